//! Virtual memory: address spaces, the physical-frame scheduler and the
//! registry tying frames back to the spaces that own them.

mod address_space;
mod coremap;

pub use address_space::AddressSpace;
pub use coremap::Coremap;

use std::collections::HashMap;
use std::sync::Arc;

use spin::Mutex;

/// Identifies a user address space; doubles as the exec/join handle.
pub type SpaceId = usize;

/// The coremap plus the space registry it resolves owners through. Frames
/// hold `(SpaceId, vpn)` pairs rather than pointers, so tearing a space down
/// can never leave the coremap dangling.
pub struct Vm {
    pub coremap: Coremap,
    spaces: Mutex<HashMap<SpaceId, Arc<AddressSpace>>>,
}

impl Vm {
    pub fn new(num_phys_pages: usize) -> Arc<Self> {
        Arc::new(Self {
            coremap: Coremap::new(num_phys_pages),
            spaces: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, id: SpaceId, space: Arc<AddressSpace>) {
        let previous = self.spaces.lock().insert(id, space);
        assert!(previous.is_none(), "space id {} registered twice", id);
    }

    pub fn unregister(&self, id: SpaceId) {
        self.spaces.lock().remove(&id);
    }

    pub fn space(&self, id: SpaceId) -> Option<Arc<AddressSpace>> {
        self.spaces.lock().get(&id).cloned()
    }
}
