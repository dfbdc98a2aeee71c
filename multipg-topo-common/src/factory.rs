use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;

use crate::conn::Conn;
use crate::error::TopoError;

/// Creates [`Conn`]s for one backend implementation. A factory is handed the
/// cell name (or `"global"`), the root path inside the backend, and the
/// backend server addresses.
pub trait Factory: Send + Sync {
    fn create(
        &self,
        cell: &str,
        root: &str,
        server_addresses: &[String],
    ) -> Result<Arc<dyn Conn>, TopoError>;
}

lazy_static! {
    static ref FACTORIES: RwLock<HashMap<String, Arc<dyn Factory>>> = RwLock::new(HashMap::new());
}

/// Register a backend factory under an implementation name.
///
/// Call once per backend at process start. Registering the same name twice
/// is a fatal misconfiguration.
///
/// # Panics
///
/// Panics when `name` is already registered.
pub fn register_factory(name: &str, factory: Arc<dyn Factory>) {
    let mut factories = FACTORIES.write().expect("factory registry poisoned");
    if factories.contains_key(name) {
        panic!("duplicate topology factory registration for {}", name);
    }
    factories.insert(name.to_owned(), factory);
}

/// Look up a registered backend factory by implementation name.
pub fn get_factory(implementation: &str) -> Result<Arc<dyn Factory>, TopoError> {
    FACTORIES
        .read()
        .expect("factory registry poisoned")
        .get(implementation)
        .cloned()
        .ok_or_else(|| TopoError::no_implementation(implementation))
}
