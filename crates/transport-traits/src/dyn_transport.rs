use crate::Transport;
use std::ops::Deref;
use std::sync::Arc;

/// `DynTransport` holds a shared trait object, enabling dynamic dispatch
/// across [`Transport`] implementations.
///
/// Unlike a boxed trait object it can be cloned cheaply, which lets every
/// background transfer attempt hold its own handle.
#[derive(Clone)]
pub struct DynTransport(Arc<dyn Transport>);

impl DynTransport {
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        DynTransport(Arc::new(transport))
    }
}

impl Deref for DynTransport {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}
