// Hybrid table: dense 1-based array part plus hash part for everything else.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ahash::RandomState;

use super::lua_value::{LuaValue, float_to_integer};

pub struct LuaTable {
    /// Array part: keys 1..=array.len(), allocated lazily
    array: Vec<LuaValue>,
    /// Hash part for non-sequence keys, allocated lazily
    hash: Option<Box<HashMap<LuaValue, LuaValue, RandomState>>>,
    metatable: Option<Rc<RefCell<LuaTable>>>,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            array: Vec::new(),
            hash: None,
            metatable: None,
        }
    }

    pub fn with_capacity(asize: usize, hsize: usize) -> Self {
        let hash = if hsize > 0 {
            Some(Box::new(HashMap::with_capacity_and_hasher(
                hsize,
                RandomState::new(),
            )))
        } else {
            None
        };
        LuaTable {
            array: Vec::with_capacity(asize),
            hash,
            metatable: None,
        }
    }

    pub fn get_metatable(&self) -> Option<Rc<RefCell<LuaTable>>> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<Rc<RefCell<LuaTable>>>) {
        self.metatable = mt;
    }

    /// Canonicalize a key: integral floats become integers. Nil and NaN keys
    /// are the caller's responsibility to reject.
    fn normalize_key(key: &LuaValue) -> LuaValue {
        if let LuaValue::Float(f) = key {
            if let Some(i) = float_to_integer(*f) {
                return LuaValue::Integer(i);
            }
        }
        key.clone()
    }

    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = int_key(key) {
            if i >= 1 && (i as usize) <= self.array.len() {
                return self.array[i as usize - 1].clone();
            }
        }
        let key = Self::normalize_key(key);
        self.hash
            .as_ref()
            .and_then(|h| h.get(&key).cloned())
            .unwrap_or(LuaValue::Nil)
    }

    pub fn get_int(&self, i: i64) -> LuaValue {
        if i >= 1 && (i as usize) <= self.array.len() {
            return self.array[i as usize - 1].clone();
        }
        self.hash
            .as_ref()
            .and_then(|h| h.get(&LuaValue::Integer(i)).cloned())
            .unwrap_or(LuaValue::Nil)
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        match &self.hash {
            Some(h) => h
                .get(&LuaValue::string(key))
                .cloned()
                .unwrap_or(LuaValue::Nil),
            None => LuaValue::Nil,
        }
    }

    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(i) = int_key(&key) {
            return self.set_int(i, value);
        }
        let key = Self::normalize_key(&key);
        let hash = self
            .hash
            .get_or_insert_with(|| Box::new(HashMap::with_hasher(RandomState::new())));
        if value.is_nil() {
            hash.remove(&key);
        } else {
            hash.insert(key, value);
        }
    }

    pub fn set_int(&mut self, i: i64, value: LuaValue) {
        let len = self.array.len();
        if i >= 1 && (i as usize) <= len {
            let idx = i as usize - 1;
            if value.is_nil() && i as usize == len {
                // Removing the last element shrinks the border
                self.array.pop();
                while matches!(self.array.last(), Some(LuaValue::Nil)) {
                    self.array.pop();
                }
            } else {
                self.array[idx] = value;
            }
            return;
        }
        if i as i128 == len as i128 + 1 && !value.is_nil() {
            self.array.push(value);
            self.absorb_from_hash();
            return;
        }
        let hash = self
            .hash
            .get_or_insert_with(|| Box::new(HashMap::with_hasher(RandomState::new())));
        if value.is_nil() {
            hash.remove(&LuaValue::Integer(i));
        } else {
            hash.insert(LuaValue::Integer(i), value);
        }
    }

    /// After appending, pull now-contiguous integer keys out of the hash part.
    fn absorb_from_hash(&mut self) {
        if let Some(hash) = &mut self.hash {
            loop {
                let next = LuaValue::Integer(self.array.len() as i64 + 1);
                match hash.remove(&next) {
                    Some(v) => self.array.push(v),
                    None => break,
                }
            }
        }
    }

    /// The `#` border: array part length after trailing-nil trimming.
    pub fn len(&self) -> i64 {
        let mut n = self.array.len();
        while n > 0 && self.array[n - 1].is_nil() {
            n -= 1;
        }
        n as i64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.hash.as_ref().map_or(true, |h| h.is_empty())
    }

    /// Number of live entries, array and hash parts together.
    pub fn count(&self) -> usize {
        let arr = self.array.iter().filter(|v| !v.is_nil()).count();
        arr + self.hash.as_ref().map_or(0, |h| h.len())
    }

    /// Stateless iteration protocol for `next`. A nil input key starts the
    /// traversal; returns None when exhausted or the key is absent.
    pub fn next(&self, key: &LuaValue) -> Option<(LuaValue, LuaValue)> {
        let hash_first = || {
            self.hash
                .as_ref()
                .and_then(|h| h.iter().next().map(|(k, v)| (k.clone(), v.clone())))
        };
        match key {
            LuaValue::Nil => {
                for (i, v) in self.array.iter().enumerate() {
                    if !v.is_nil() {
                        return Some((LuaValue::Integer(i as i64 + 1), v.clone()));
                    }
                }
                hash_first()
            }
            _ => {
                let key = Self::normalize_key(key);
                if let LuaValue::Integer(i) = key {
                    if i >= 1 && (i as usize) <= self.array.len() {
                        for (j, v) in self.array.iter().enumerate().skip(i as usize) {
                            if !v.is_nil() {
                                return Some((LuaValue::Integer(j as i64 + 1), v.clone()));
                            }
                        }
                        return hash_first();
                    }
                }
                let hash = self.hash.as_ref()?;
                let mut it = hash.iter();
                for (k, _) in it.by_ref() {
                    if *k == key {
                        break;
                    }
                }
                it.next().map(|(k, v)| (k.clone(), v.clone()))
            }
        }
    }

    /// Shift-insert for `table.insert(t, pos, v)`; pos is 1-based and must be
    /// within 1..=len+1.
    pub fn insert_at(&mut self, pos: i64, value: LuaValue) -> Result<(), ()> {
        let len = self.len();
        if pos < 1 || pos > len + 1 {
            return Err(());
        }
        if pos == len + 1 {
            self.set_int(pos, value);
        } else {
            self.array.insert(pos as usize - 1, value);
            self.absorb_from_hash();
        }
        Ok(())
    }

    /// Shift-remove for `table.remove(t, pos)`.
    pub fn remove_at(&mut self, pos: i64) -> Result<LuaValue, ()> {
        let len = self.len();
        if len == 0 && (pos == 0 || pos == len) {
            return Ok(LuaValue::Nil);
        }
        if pos < 1 || pos > len + 1 {
            return Err(());
        }
        if pos == len + 1 {
            return Ok(LuaValue::Nil);
        }
        if pos as usize <= self.array.len() {
            Ok(self.array.remove(pos as usize - 1))
        } else {
            let v = self.get_int(pos);
            self.set_int(pos, LuaValue::Nil);
            Ok(v)
        }
    }

    /// All live entries, array part first. Snapshot, for GC traversal.
    pub fn iter_all(&self) -> Vec<(LuaValue, LuaValue)> {
        let mut out = Vec::with_capacity(self.count());
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                out.push((LuaValue::Integer(i as i64 + 1), v.clone()));
            }
        }
        if let Some(h) = &self.hash {
            for (k, v) in h.iter() {
                out.push((k.clone(), v.clone()));
            }
        }
        out
    }

    /// Drop every entry and the metatable. Used by the cycle collector to
    /// break reference cycles through this table.
    pub fn clear_all(&mut self) {
        self.array.clear();
        self.hash = None;
        self.metatable = None;
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn int_key(key: &LuaValue) -> Option<i64> {
    match key {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(f) => float_to_integer(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_append_and_border() {
        let mut t = LuaTable::new();
        t.set_int(1, LuaValue::integer(10));
        t.set_int(2, LuaValue::integer(20));
        t.set_int(3, LuaValue::integer(30));
        assert_eq!(t.len(), 3);
        assert_eq!(t.get_int(2), LuaValue::integer(20));
        t.set_int(3, LuaValue::Nil);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_hash_part_and_float_key_canonicalization() {
        let mut t = LuaTable::new();
        t.raw_set(LuaValue::float(2.0), LuaValue::integer(7));
        // 2.0 canonicalizes to the integer key 2
        assert_eq!(t.get_int(2), LuaValue::integer(7));
        assert_eq!(t.raw_get(&LuaValue::Integer(2)), LuaValue::integer(7));
        t.raw_set(LuaValue::float(1.0), LuaValue::integer(1));
        assert_eq!(t.raw_get(&LuaValue::float(1.0)), LuaValue::integer(1));
        assert_eq!(t.get_int(1), LuaValue::integer(1));
    }

    #[test]
    fn test_absorb_from_hash() {
        let mut t = LuaTable::new();
        t.set_int(3, LuaValue::integer(3));
        t.set_int(2, LuaValue::integer(2));
        assert_eq!(t.len(), 0);
        t.set_int(1, LuaValue::integer(1));
        // 1 appended, then 2 and 3 migrate out of the hash part
        assert_eq!(t.len(), 3);
        assert_eq!(t.get_int(3), LuaValue::integer(3));
    }

    #[test]
    fn test_next_traversal() {
        let mut t = LuaTable::new();
        t.set_int(1, LuaValue::integer(10));
        t.set_int(2, LuaValue::integer(20));
        let mut seen = 0;
        let mut key = LuaValue::Nil;
        while let Some((k, _)) = t.next(&key) {
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_insert_remove_at() {
        let mut t = LuaTable::new();
        for i in 1..=3 {
            t.set_int(i, LuaValue::integer(i * 10));
        }
        t.insert_at(2, LuaValue::integer(15)).unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.get_int(2), LuaValue::integer(15));
        assert_eq!(t.get_int(3), LuaValue::integer(20));
        let removed = t.remove_at(1).unwrap();
        assert_eq!(removed, LuaValue::integer(10));
        assert_eq!(t.get_int(1), LuaValue::integer(15));
    }
}
