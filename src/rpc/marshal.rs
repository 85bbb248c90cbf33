//! Callback marshaling for outbound params.
//!
//! Params are a tagged value tree.  Containers are shared (`Rc`) so that a
//! caller can build the same shapes a dynamic language allows, including
//! accidental cycles.  The marshal pass walks containers depth-first,
//! lifts every embedded [`Param::Callback`] out into a table keyed by its
//! slash-joined path, and emits plain JSON for the wire:
//!
//! ```text
//! {a: {b: fn}}     →  params {"a":{}}        callbacks ["a/b"]
//! [1, fn]          →  params [1,null]        callbacks ["1"]
//! o = {}; o.k = o  →  CircularParams
//! ```
//!
//! Containers are tracked by identity, not structure: visiting the same
//! `Rc` twice fails even if the graph is acyclic.

use core::cell::RefCell;
use core::fmt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::{ChannelError, Result};

/// A function the peer may invoke while the call is open.
pub type Callback = Rc<dyn Fn(Value)>;

type ListCell = Rc<RefCell<Vec<Param>>>;
type MapCell = Rc<RefCell<BTreeMap<String, Param>>>;

/// Outbound parameter value.
#[derive(Clone)]
pub enum Param {
    /// Plain JSON data, copied to the wire verbatim.
    Scalar(Value),
    List(ListCell),
    Map(MapCell),
    Callback(Callback),
}

impl Param {
    pub fn null() -> Self {
        Self::Scalar(Value::Null)
    }

    /// A fresh, empty map container.
    pub fn map() -> Self {
        Self::Map(Rc::new(RefCell::new(BTreeMap::new())))
    }

    /// A fresh, empty list container.
    pub fn list() -> Self {
        Self::List(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn callback(f: impl Fn(Value) + 'static) -> Self {
        Self::Callback(Rc::new(f))
    }

    /// Insert into a map container.  Returns `self` for chaining.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Param>) -> Result<&Self> {
        let Self::Map(map) = self else {
            return Err(ChannelError::config(format!("insert into {self:?}: not a map")));
        };
        map.borrow_mut().insert(key.into(), value.into());
        Ok(self)
    }

    /// Append to a list container.
    pub fn push(&self, value: impl Into<Param>) -> Result<&Self> {
        let Self::List(list) = self else {
            return Err(ChannelError::config(format!("push onto {self:?}: not a list")));
        };
        list.borrow_mut().push(value.into());
        Ok(self)
    }
}

impl Default for Param {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Param {
    // Shallow on purpose: containers may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "Scalar({v})"),
            Self::List(l) => write!(f, "List(len={})", l.borrow().len()),
            Self::Map(m) => write!(f, "Map(keys={:?})", m.borrow().keys().collect::<Vec<_>>()),
            Self::Callback(_) => write!(f, "Callback"),
        }
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Self::Scalar(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Self::Scalar(Value::from(v))
    }
}

// ── Marshal pass ──────────────────────────────────────────────

/// Result of marshaling outbound params.
pub struct Marshaled {
    /// Wire params with every callback removed.
    pub params: Value,
    /// Callback paths in discovery order.
    pub names: Vec<String>,
    /// Callbacks by path.
    pub callbacks: HashMap<String, Callback>,
}

/// Lift callbacks out of `params`.
///
/// Fails with [`ChannelError::CircularParams`] if a container is reached
/// twice, and with [`ChannelError::Config`] if the root itself is a
/// callback (it would have no path).
pub fn marshal(params: &Param) -> Result<Marshaled> {
    if let Param::Callback(_) = params {
        return Err(ChannelError::config("params root cannot be a callback"));
    }

    let mut walker = Walker::default();
    let params = walker.walk(params, "")?;
    Ok(Marshaled {
        params,
        names: walker.names,
        callbacks: walker.callbacks,
    })
}

#[derive(Default)]
struct Walker {
    seen: HashSet<*const ()>,
    names: Vec<String>,
    callbacks: HashMap<String, Callback>,
}

impl Walker {
    fn walk(&mut self, param: &Param, path: &str) -> Result<Value> {
        match param {
            Param::Scalar(v) => Ok(v.clone()),
            // Reached only for list slots and map values; handled by the
            // parent, which knows the path.
            Param::Callback(_) => Ok(Value::Null),
            Param::List(list) => {
                self.enter(Rc::as_ptr(list).cast())?;
                let items = list.borrow();
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let child = join(path, &i.to_string());
                    if let Param::Callback(cb) = item {
                        self.record(child, cb);
                        out.push(Value::Null);
                    } else {
                        out.push(self.walk(item, &child)?);
                    }
                }
                Ok(Value::Array(out))
            }
            Param::Map(map) => {
                self.enter(Rc::as_ptr(map).cast())?;
                let entries = map.borrow();
                let mut out = Map::new();
                for (key, item) in entries.iter() {
                    let child = join(path, key);
                    if let Param::Callback(cb) = item {
                        self.record(child, cb);
                    } else {
                        out.insert(key.clone(), self.walk(item, &child)?);
                    }
                }
                Ok(Value::Object(out))
            }
        }
    }

    fn enter(&mut self, ptr: *const ()) -> Result<()> {
        if self.seen.insert(ptr) {
            Ok(())
        } else {
            Err(ChannelError::CircularParams)
        }
    }

    fn record(&mut self, path: String, cb: &Callback) {
        self.callbacks.insert(path.clone(), cb.clone());
        self.names.push(path);
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}
