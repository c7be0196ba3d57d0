use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::{
    profiler::{FunctionId, MethodKey, ProfilerHost},
    Error, Result,
};

/// In-memory [`ProfilerHost`] recording every request made against it
#[derive(Default)]
pub struct MockHost {
    functions: Mutex<HashMap<FunctionId, MethodKey>>,
    generics: Mutex<HashSet<MethodKey>>,
    bodies: Mutex<HashMap<MethodKey, Vec<u8>>>,
    body_reads: AtomicUsize,
    rejits: Mutex<Vec<MethodKey>>,
    reverts: Mutex<Vec<MethodKey>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&self, function: FunctionId, key: MethodKey) {
        lock!(self.functions).insert(function, key);
    }

    pub fn add_generic(&self, function: FunctionId, key: MethodKey) {
        self.add_function(function, key);
        lock!(self.generics).insert(key);
    }

    pub fn set_body(&self, key: MethodKey, body: Vec<u8>) {
        lock!(self.bodies).insert(key, body);
    }

    pub fn body_reads(&self) -> usize {
        self.body_reads.load(Ordering::SeqCst)
    }

    pub fn rejits(&self) -> Vec<MethodKey> {
        lock!(self.rejits).clone()
    }

    pub fn reverts(&self) -> Vec<MethodKey> {
        lock!(self.reverts).clone()
    }
}

impl ProfilerHost for MockHost {
    fn function_key(&self, function: FunctionId) -> Result<MethodKey> {
        lock!(self.functions)
            .get(&function)
            .copied()
            .ok_or(Error::FunctionNotFound(function))
    }

    fn function_from_token(&self, key: MethodKey) -> Result<FunctionId> {
        if lock!(self.generics).contains(&key) {
            return Err(Error::GenericMethod(key));
        }

        lock!(self.functions)
            .iter()
            .find(|(_, candidate)| **candidate == key)
            .map(|(function, _)| *function)
            .ok_or_else(|| Error::Host(format!("no function for {}", key)))
    }

    fn il_function_body(&self, key: MethodKey) -> Result<Vec<u8>> {
        self.body_reads.fetch_add(1, Ordering::SeqCst);
        lock!(self.bodies)
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Host(format!("no body for {}", key)))
    }

    fn request_rejit(&self, methods: &[MethodKey]) -> Result<()> {
        lock!(self.rejits).extend_from_slice(methods);
        Ok(())
    }

    fn request_revert(&self, methods: &[MethodKey]) -> Result<()> {
        lock!(self.reverts).extend_from_slice(methods);
        Ok(())
    }
}
