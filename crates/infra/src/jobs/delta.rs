//! Delta computation: source members (optionally filtered) absent from the
//! target.

use std::collections::HashSet;

use memberflow_core::{CollectionId, MemberId};

use crate::membership::{MembershipStore, MembershipStoreError};

use super::types::MemberSelection;

/// Members of `source` not in `target`, restricted to `selection`.
///
/// Read-only. An explicit empty selection returns an empty delta without
/// touching the store. The result is sorted so batches are reproducible, but
/// callers must not rely on any particular order.
pub fn compute_delta<M>(
    store: &M,
    source: CollectionId,
    target: CollectionId,
    selection: &MemberSelection,
) -> Result<Vec<MemberId>, MembershipStoreError>
where
    M: MembershipStore + ?Sized,
{
    let source_members = match selection {
        MemberSelection::All => store.members(source, None)?,
        MemberSelection::Selected(ids) if ids.is_empty() => return Ok(Vec::new()),
        MemberSelection::Selected(ids) => {
            let selected: HashSet<MemberId> = ids.iter().copied().collect();
            store.members(source, Some(&selected))?
        }
    };

    if source_members.is_empty() {
        return Ok(Vec::new());
    }

    let target_members = store.members(target, None)?;
    Ok(difference(&source_members, &target_members))
}

/// Set difference `source − target`, sorted.
pub fn difference(source: &HashSet<MemberId>, target: &HashSet<MemberId>) -> Vec<MemberId> {
    let mut delta: Vec<MemberId> = source.difference(target).copied().collect();
    delta.sort_unstable();
    delta
}
