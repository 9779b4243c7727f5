//! Decides what an accepted change batch means for the checkpoint.

use crate::assembler::assemble;
use crate::types::{ChangeBatch, ChangeNumber, ChangelistEvent};

/// Outcome of applying one batch on top of a checkpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// The upstream ceiling equals the checkpoint; nothing to do.
    Unchanged,
    /// The checkpoint moves to `to`.
    Advanced {
        from: ChangeNumber,
        to: ChangeNumber,
        /// Ordered changelists to emit. Empty when `suppressed`.
        changelists: Vec<ChangelistEvent>,
        /// Cold start: the backlog is skipped instead of emitted.
        suppressed: bool,
    },
}

/// Reconcile `batch` against the checkpoint taken before it was requested.
pub fn reconcile(checkpoint: ChangeNumber, batch: &ChangeBatch) -> Reconciliation {
    let to = batch.current_change_number;
    if to == checkpoint {
        return Reconciliation::Unchanged;
    }

    let suppressed = checkpoint.is_unknown();
    let changelists = if suppressed {
        Vec::new()
    } else {
        assemble(batch.app_changes.values(), batch.package_changes.values())
    };

    Reconciliation::Advanced {
        from: checkpoint,
        to,
        changelists,
        suppressed,
    }
}
