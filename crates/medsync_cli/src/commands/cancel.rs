//! Cancel command implementation.

use std::path::Path;

/// Runs the cancel command.
pub fn run(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (_, sync) = super::open(path)?;
    if !sync.cancel_operation(id) {
        return Err(format!("No pending operation with id {id}").into());
    }
    println!("Cancelled {id} ({} pending)", sync.pending_count());
    Ok(())
}
