//! Built-in games.

pub mod nim;

use crate::errors::ServerError;
use crate::namespace::GameRegistry;

/// Registers every game this server ships with.
pub fn register_builtins(registry: &mut GameRegistry) -> Result<(), ServerError> {
    registry.register(nim::namespace()?);
    Ok(())
}
