//! Heap objects and boxed values.
//!
//! Registers in the object partition hold an [`ObjectRef`]: `None` is the null
//! reference, `Some` points to a shared [`Object`]. Reference equality is
//! pointer identity.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

use crate::Vec;
use crate::vm::SlotKind;

/// Identifier of a class registered in an [`Environment`](crate::vm::Environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

pub type ObjectRef = Option<Rc<Object>>;

#[derive(Debug)]
pub enum Object {
    String(Rc<str>),
    Array(RefCell<Array>),
    Instance(Instance),
}

#[derive(Debug)]
pub struct Instance {
    pub class: ClassId,
    pub fields: RefCell<Vec<Value>>,
}

/// Array storage, one variant per register partition.
///
/// Narrow integral arrays (`boolean[]`, `byte[]`, ...) are stored widened in
/// the int variant.
#[derive(Debug, Clone)]
pub enum Array {
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Object(Vec<ObjectRef>),
}

impl Array {
    pub fn new(kind: SlotKind, len: usize) -> Self {
        match kind {
            SlotKind::Int => Array::Int(alloc::vec![0; len]),
            SlotKind::Long => Array::Long(alloc::vec![0; len]),
            SlotKind::Float => Array::Float(alloc::vec![0.0; len]),
            SlotKind::Double => Array::Double(alloc::vec![0.0; len]),
            SlotKind::Object => Array::Object(alloc::vec![None; len]),
        }
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Array::Int(_) => SlotKind::Int,
            Array::Long(_) => SlotKind::Long,
            Array::Float(_) => SlotKind::Float,
            Array::Double(_) => SlotKind::Double,
            Array::Object(_) => SlotKind::Object,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Array::Int(v) => v.len(),
            Array::Long(v) => v.len(),
            Array::Float(v) => v.len(),
            Array::Double(v) => v.len(),
            Array::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads element `index`, or `None` when it is out of range.
    pub fn get(&self, index: usize) -> Option<Value> {
        Some(match self {
            Array::Int(v) => Value::Int(*v.get(index)?),
            Array::Long(v) => Value::Long(*v.get(index)?),
            Array::Float(v) => Value::Float(*v.get(index)?),
            Array::Double(v) => Value::Double(*v.get(index)?),
            Array::Object(v) => Value::Object(v.get(index)?.clone()),
        })
    }

    /// Writes element `index`. Returns `false` when the index is out of
    /// range or the value belongs to another partition.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match (self, value) {
            (Array::Int(v), Value::Int(x)) => v.get_mut(index).map(|e| *e = x).is_some(),
            (Array::Long(v), Value::Long(x)) => v.get_mut(index).map(|e| *e = x).is_some(),
            (Array::Float(v), Value::Float(x)) => v.get_mut(index).map(|e| *e = x).is_some(),
            (Array::Double(v), Value::Double(x)) => v.get_mut(index).map(|e| *e = x).is_some(),
            (Array::Object(v), Value::Object(x)) => v.get_mut(index).map(|e| *e = x).is_some(),
            _ => false,
        }
    }
}

/// A value crossing the interpreter boundary: arguments, native call
/// results, field contents.
#[derive(Clone)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(ObjectRef),
}

impl Value {
    pub fn null() -> Self {
        Value::Object(None)
    }

    pub fn string(s: &str) -> Self {
        Value::Object(Some(Rc::new(Object::String(Rc::from(s)))))
    }

    pub fn bool(b: bool) -> Self {
        Value::Int(b as i32)
    }

    /// The zero value of a partition, used to initialise fields and arrays.
    pub fn default_for(kind: SlotKind) -> Self {
        match kind {
            SlotKind::Int => Value::Int(0),
            SlotKind::Long => Value::Long(0),
            SlotKind::Float => Value::Float(0.0),
            SlotKind::Double => Value::Double(0.0),
            SlotKind::Object => Value::Object(None),
        }
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Value::Int(_) => SlotKind::Int,
            Value::Long(_) => SlotKind::Long,
            Value::Float(_) => SlotKind::Float,
            Value::Double(_) => SlotKind::Double,
            Value::Object(_) => SlotKind::Object,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string contents if this is a non-null string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Object(Some(obj)) => match &**obj {
                Object::String(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Object(a), Value::Object(b)) => ref_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{:?}f", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::Object(None) => write!(f, "null"),
            Value::Object(Some(obj)) => match &**obj {
                Object::String(s) => write!(f, "{:?}", s),
                Object::Array(a) => write!(f, "{:?}[{}]", a.borrow().kind(), a.borrow().len()),
                Object::Instance(i) => write!(f, "<instance of class {}>", i.class.0),
            },
        }
    }
}

/// Reference identity; two nulls are equal.
pub fn ref_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_eq_is_identity() {
        let a = Value::string("x");
        let b = Value::string("x");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(Value::null(), Value::null());
        assert_ne!(a, Value::null());
    }

    #[test]
    fn test_object_array_clone_keeps_references() {
        let s = Value::string("x");
        let mut array = Array::new(SlotKind::Object, 2);
        assert!(array.set(0, s.clone()));

        let copy = array.clone();
        assert_eq!(copy.get(0), Some(s));
        assert_eq!(copy.get(1), Some(Value::null()));
    }

    #[test]
    fn test_array_get_out_of_range() {
        let array = Array::new(SlotKind::Long, 2);
        assert_eq!(array.get(1), Some(Value::Long(0)));
        assert_eq!(array.get(2), None);
    }
}
