//! Backend-agnostic conformance suite for topology backends.
//!
//! Every backend, real or in-memory, must pass the same contract. A backend
//! crate calls [`run_topo_test_suite`] from one of its tests with a factory
//! that builds a fresh store containing a single cell named
//! [`LOCAL_CELL_NAME`]; the suite runs every scenario against its own fresh
//! store and closes it afterwards.

use std::future::Future;

use multipg_topo::TopoStore;

mod directory;
mod file;
mod lock;
mod watch;

/// The cell name the factory must pre-create.
pub const LOCAL_CELL_NAME: &str = "test";

/// Run the full `Conn` contract test suite. The factory is invoked once per
/// scenario and must return a store whose global namespace knows one cell
/// named [`LOCAL_CELL_NAME`].
pub async fn run_topo_test_suite<F, Fut>(factory: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = TopoStore>,
{
    // Lock API.
    let ts = factory().await;
    lock::check_lock(&ts).await;
    let _ = ts.close();

    let ts = factory().await;
    lock::check_try_lock(&ts).await;
    let _ = ts.close();

    let ts = factory().await;
    lock::check_lock_name(&ts).await;
    let _ = ts.close();

    // Directory API.
    let ts = factory().await;
    directory::check_directory(&ts).await;
    let _ = ts.close();

    // Watch API.
    let ts = factory().await;
    watch::check_watch(&ts).await;
    let _ = ts.close();

    let ts = factory().await;
    watch::check_watch_interrupt(&ts).await;
    let _ = ts.close();

    let ts = factory().await;
    watch::check_watch_recursive(&ts).await;
    let _ = ts.close();

    // File API.
    let ts = factory().await;
    file::check_file(&ts).await;
    let _ = ts.close();

    let ts = factory().await;
    file::check_list(&ts).await;
    let _ = ts.close();
}
