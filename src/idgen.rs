//! Identifier generation port.

/// Produces new aggregate identifiers.
///
/// Implementations must return a non-empty, practically unique token on
/// every call.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Default generator: random UUID v4 in hyphenated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}
