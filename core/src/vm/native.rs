//! Native environment: classes, native functions and static fields.
//!
//! Everything the IR refers to by name is registered here and resolved to a
//! dense id while lowering, so the interpreter only ever indexes tables.
//!
//! # Example
//!
//! ```
//! use tarn_core::ir::IrType;
//! use tarn_core::vm::{Environment, Value};
//!
//! let mut env = Environment::new();
//! let abs = env.define_static("Math", "abs", &[IrType::Int], IrType::Int, |args| {
//!     Ok(Value::Int(args[0].as_int().unwrap_or(0).wrapping_abs()))
//! });
//! assert_eq!(env.function(abs).name(), "abs");
//! ```

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

use hashbrown::HashMap;

use crate::ir::{CallType, IrType};
use crate::vm::object::{Array, ClassId, Instance, Object};
use crate::vm::{NativeError, SlotKind, Value};
use crate::{String, Vec, format};

pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, NativeError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticFieldId(pub u32);

pub struct ClassInfo {
    pub name: Rc<str>,
    pub superclass: Option<ClassId>,
    /// Fields declared by this class only.
    pub fields: Vec<(Rc<str>, IrType)>,
}

pub struct NativeFunction {
    owner: Rc<str>,
    name: Rc<str>,
    call_type: CallType,
    params: Vec<IrType>,
    ret: IrType,
    func: NativeFn,
}

impl NativeFunction {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Declared parameter types, excluding the receiver of instance methods.
    pub fn params(&self) -> &[IrType] {
        &self.params
    }

    pub fn return_type(&self) -> IrType {
        self.ret
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, NativeError> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.owner, self.name, self.params.len())
    }
}

struct StaticField {
    ty: IrType,
}

pub struct Environment {
    classes: Vec<ClassInfo>,
    class_index: HashMap<Rc<str>, ClassId>,
    functions: Vec<NativeFunction>,
    function_index: HashMap<String, FunctionId>,
    static_fields: Vec<StaticField>,
    static_index: HashMap<String, StaticFieldId>,
    static_values: RefCell<Vec<Value>>,
}

impl Environment {
    /// Root of the class hierarchy. Arrays are instances of this class only.
    pub const OBJECT: ClassId = ClassId(0);
    pub const STRING: ClassId = ClassId(1);

    pub fn new() -> Self {
        let mut env = Self {
            classes: Vec::new(),
            class_index: HashMap::new(),
            functions: Vec::new(),
            function_index: HashMap::new(),
            static_fields: Vec::new(),
            static_index: HashMap::new(),
            static_values: RefCell::new(Vec::new()),
        };
        env.define_class("Object", None, &[]);
        env.define_class("String", Some(Self::OBJECT), &[]);
        env
    }

    // === Classes ===

    /// Registers a class. Redefining a name shadows the previous class.
    pub fn define_class(
        &mut self,
        name: &str,
        superclass: Option<ClassId>,
        fields: &[(&str, IrType)],
    ) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        let name: Rc<str> = Rc::from(name);
        self.classes.push(ClassInfo {
            name: name.clone(),
            superclass,
            fields: fields.iter().map(|(n, t)| (Rc::from(*n), *t)).collect(),
        });
        self.class_index.insert(name, id);
        id
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(name).copied()
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0 as usize]
    }

    /// Whether `class` is `ancestor` or one of its subclasses.
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.class(id).superclass;
        }
        false
    }

    /// Whether `object` can be viewed as an instance of `class`.
    pub fn is_instance(&self, object: &Object, class: ClassId) -> bool {
        match object {
            Object::String(_) => self.is_subclass(Self::STRING, class),
            Object::Array(_) => class == Self::OBJECT,
            Object::Instance(instance) => self.is_subclass(instance.class, class),
        }
    }

    /// Instance field layout: superclass fields first, then the class's own.
    fn field_layout(&self, class: ClassId) -> Vec<IrType> {
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            chain.push(id);
            current = self.class(id).superclass;
        }
        chain
            .iter()
            .rev()
            .flat_map(|id| self.class(*id).fields.iter().map(|(_, ty)| *ty))
            .collect()
    }

    /// Resolves an instance field to its index in the object layout.
    pub fn resolve_field(&self, owner: &str, name: &str) -> Option<(u32, IrType)> {
        let class = self.class_id(owner)?;
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            chain.push(id);
            current = self.class(id).superclass;
        }
        let mut index = 0u32;
        let mut found = None;
        for id in chain.iter().rev() {
            for (field_name, ty) in &self.class(*id).fields {
                if &**field_name == name {
                    // Later (more derived) declarations shadow earlier ones.
                    found = Some((index, *ty));
                }
                index += 1;
            }
        }
        found
    }

    /// Creates an instance of `class` with every field zeroed.
    pub fn instantiate(&self, class: ClassId) -> Value {
        let fields = self
            .field_layout(class)
            .into_iter()
            .map(|ty| Value::default_for(ty.slot_kind().unwrap_or(SlotKind::Object)))
            .collect();
        Value::Object(Some(Rc::new(Object::Instance(Instance {
            class,
            fields: RefCell::new(fields),
        }))))
    }

    pub fn new_array(&self, kind: SlotKind, len: usize) -> Value {
        Value::Object(Some(Rc::new(Object::Array(RefCell::new(Array::new(
            kind, len,
        ))))))
    }

    // === Functions ===

    /// Registers a static native function.
    pub fn define_static(
        &mut self,
        owner: &str,
        name: &str,
        params: &[IrType],
        ret: IrType,
        func: impl Fn(&[Value]) -> Result<Value, NativeError> + 'static,
    ) -> FunctionId {
        self.define_function(owner, name, CallType::Static, params, ret, Rc::new(func))
    }

    /// Registers an instance method. The receiver arrives as `args[0]`.
    pub fn define_method(
        &mut self,
        owner: &str,
        name: &str,
        params: &[IrType],
        ret: IrType,
        func: impl Fn(&[Value]) -> Result<Value, NativeError> + 'static,
    ) -> FunctionId {
        self.define_function(owner, name, CallType::Instance, params, ret, Rc::new(func))
    }

    fn define_function(
        &mut self,
        owner: &str,
        name: &str,
        call_type: CallType,
        params: &[IrType],
        ret: IrType,
        func: NativeFn,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(NativeFunction {
            owner: Rc::from(owner),
            name: Rc::from(name),
            call_type,
            params: params.to_vec(),
            ret,
            func,
        });
        self.function_index.insert(format!("{}.{}", owner, name), id);
        id
    }

    pub fn resolve_function(&self, owner: &str, name: &str) -> Option<FunctionId> {
        self.function_index
            .get(format!("{}.{}", owner, name).as_str())
            .copied()
    }

    pub fn function(&self, id: FunctionId) -> &NativeFunction {
        &self.functions[id.0 as usize]
    }

    // === Static fields ===

    pub fn define_static_field(
        &mut self,
        owner: &str,
        name: &str,
        ty: IrType,
        initial: Value,
    ) -> StaticFieldId {
        let id = StaticFieldId(self.static_fields.len() as u32);
        self.static_fields.push(StaticField { ty });
        self.static_values.borrow_mut().push(initial);
        self.static_index.insert(format!("{}.{}", owner, name), id);
        id
    }

    pub fn resolve_static_field(&self, owner: &str, name: &str) -> Option<(StaticFieldId, IrType)> {
        let id = *self.static_index.get(format!("{}.{}", owner, name).as_str())?;
        Some((id, self.static_fields[id.0 as usize].ty))
    }

    pub fn static_value(&self, id: StaticFieldId) -> Value {
        self.static_values.borrow()[id.0 as usize].clone()
    }

    /// Updates a static field. Natives use this to publish state.
    pub fn set_static_value(&self, id: StaticFieldId, value: Value) {
        self.static_values.borrow_mut()[id.0 as usize] = value;
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
