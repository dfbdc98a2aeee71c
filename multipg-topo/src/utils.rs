//! Small helpers shared across the typed topology APIs.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use multipg_topo_common::DirEntry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::records::{ComponentId, ComponentKind};

/// Alphabet used for generated component names: consonants plus the digits
/// that cannot be confused with vowels, so no accidental words come out.
const NAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

lazy_static! {
    static ref NAME_RNG: Mutex<StdRng> = {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Mutex::new(StdRng::seed_from_u64(seed))
    };
}

/// Generate a random name of `len` characters. Not cryptographic.
pub fn random_name(len: usize) -> String {
    let mut rng = NAME_RNG.lock().expect("name rng poisoned");
    (0..len)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect()
}

/// Extract the names out of a directory listing, preserving the backend's
/// by-name ordering.
pub fn dir_entries_to_names(entries: Vec<DirEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.name).collect()
}

/// The lowercased tag a component kind uses inside paths and ID strings.
pub fn component_kind_tag(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Multigateway => "multigateway",
        ComponentKind::Multipooler => "multipooler",
        ComponentKind::Multiorch => "multiorch",
        ComponentKind::Pgctld => "pgctld",
        ComponentKind::Unknown => "unknown",
    }
}

/// The string form of a component ID: `<kind>-<cell>-<name>`.
pub fn component_id_string(id: &ComponentId) -> String {
    format!(
        "{}-{}-{}",
        component_kind_tag(id.component()),
        id.cell,
        id.name
    )
}

/// Parse a directory name of the form `<kind>-<cell>-<name>` back into a
/// component ID. The cell must be known by the caller since cell names may
/// themselves contain dashes.
pub fn parse_component_id(dir_name: &str, cell: &str) -> Option<ComponentId> {
    for kind in [
        ComponentKind::Multigateway,
        ComponentKind::Multipooler,
        ComponentKind::Multiorch,
        ComponentKind::Pgctld,
    ] {
        let prefix = format!("{}-{}-", component_kind_tag(kind), cell);
        if let Some(name) = dir_name.strip_prefix(prefix.as_str()) {
            if !name.is_empty() {
                return Some(ComponentId {
                    component: kind as i32,
                    cell: cell.to_owned(),
                    name: name.to_owned(),
                });
            }
        }
    }
    None
}
