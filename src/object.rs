//! The polymorphic value stored under a key.
//!
//! `Robj` is a shared-ownership handle: cloning it is the reference-count
//! increment, dropping it the decrement, and the payload is destroyed
//! exactly when the last holder lets go. Container payloads carry interior
//! mutability so a value fetched from the keyspace can be modified without
//! re-inserting it; string members and fields inside containers are `Bytes`,
//! which share ownership of their buffers the same way.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::dict::{fnv1a, Dict, Fold};
use crate::list::List;
use crate::zset::Zset;

pub type Robj = Rc<Object>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    Str,
    List,
    Set,
    ZSet,
    Hash,
}

impl ObjType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjType::Str => "string",
            ObjType::List => "list",
            ObjType::Set => "set",
            ObjType::ZSet => "zset",
            ObjType::Hash => "hash",
        }
    }

    /// Stable on-disk discriminant, used as the snapshot record type byte.
    pub fn discriminant(self) -> u8 {
        match self {
            ObjType::Str => 0,
            ObjType::List => 1,
            ObjType::Set => 2,
            ObjType::ZSet => 3,
            ObjType::Hash => 4,
        }
    }

    pub fn from_discriminant(byte: u8) -> Option<ObjType> {
        match byte {
            0 => Some(ObjType::Str),
            1 => Some(ObjType::List),
            2 => Some(ObjType::Set),
            3 => Some(ObjType::ZSet),
            4 => Some(ObjType::Hash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Int,
    LinkedList,
    HashTable,
    Skiplist,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Int => "int",
            Encoding::LinkedList => "linkedlist",
            Encoding::HashTable => "hashtable",
            Encoding::Skiplist => "skiplist",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrValue {
    Raw(Bytes),
    Int(i64),
}

#[derive(Debug)]
pub enum Object {
    Str(RefCell<StrValue>),
    List(RefCell<List<Bytes>>),
    Set(RefCell<Dict<()>>),
    Hash(RefCell<Dict<Bytes>>),
    ZSet(RefCell<Zset>),
}

impl Object {
    /// A string object. Text that is a canonical decimal integer is stored
    /// under the int encoding; everything else stays raw.
    pub fn string(data: Bytes) -> Robj {
        let value = match std::str::from_utf8(&data).ok().and_then(|s| {
            s.parse::<i64>()
                .ok()
                .filter(|n| n.to_string().as_bytes() == data.as_ref())
        }) {
            Some(n) => StrValue::Int(n),
            None => StrValue::Raw(data),
        };
        Rc::new(Object::Str(RefCell::new(value)))
    }

    pub fn string_from_int(value: i64) -> Robj {
        Rc::new(Object::Str(RefCell::new(StrValue::Int(value))))
    }

    pub fn list() -> Robj {
        Rc::new(Object::List(RefCell::new(List::new())))
    }

    pub fn set() -> Robj {
        Rc::new(Object::Set(RefCell::new(Dict::new())))
    }

    pub fn hash() -> Robj {
        Rc::new(Object::Hash(RefCell::new(Dict::new())))
    }

    pub fn zset() -> Robj {
        Rc::new(Object::ZSet(RefCell::new(Zset::new())))
    }

    pub fn obj_type(&self) -> ObjType {
        match self {
            Object::Str(_) => ObjType::Str,
            Object::List(_) => ObjType::List,
            Object::Set(_) => ObjType::Set,
            Object::Hash(_) => ObjType::Hash,
            Object::ZSet(_) => ObjType::ZSet,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Object::Str(value) => match &*value.borrow() {
                StrValue::Raw(_) => Encoding::Raw,
                StrValue::Int(_) => Encoding::Int,
            },
            Object::List(_) => Encoding::LinkedList,
            Object::Set(_) | Object::Hash(_) => Encoding::HashTable,
            Object::ZSet(_) => Encoding::Skiplist,
        }
    }

    /// The string payload as bytes; int-encoded values render their
    /// canonical decimal form. `None` for non-string objects.
    pub fn str_bytes(&self) -> Option<Bytes> {
        match self {
            Object::Str(value) => Some(match &*value.borrow() {
                StrValue::Raw(data) => data.clone(),
                StrValue::Int(n) => Bytes::from(n.to_string()),
            }),
            _ => None,
        }
    }

    /// Parse the string payload back to an integer.
    pub fn int_value(&self) -> Option<i64> {
        match self {
            Object::Str(value) => match &*value.borrow() {
                StrValue::Int(n) => Some(*n),
                StrValue::Raw(data) => std::str::from_utf8(data).ok()?.parse().ok(),
            },
            _ => None,
        }
    }

    /// Overwrite the string payload with an integer. Panics when the object
    /// is not a string, which is a dispatch bug.
    pub fn set_int(&self, value: i64) {
        match self {
            Object::Str(slot) => *slot.borrow_mut() = StrValue::Int(value),
            _ => unreachable!("set_int on a non-string object"),
        }
    }
}

impl Fold for Robj {
    fn fold(&self) -> u64 {
        match self.str_bytes() {
            Some(data) => fnv1a(&data),
            None => 0,
        }
    }
}
