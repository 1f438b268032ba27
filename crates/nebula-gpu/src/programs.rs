//! The program table owned by the GPU worker.

use std::collections::HashMap;

/// Handle to a compiled program.
///
/// Ids count up from 1 and are never reused within one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u32);

impl ProgramId {
    /// The integer form used by host bindings.
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Wrap an integer from host bindings. Unknown ids never resolve.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// A table entry: a usable program, or one that failed to compile.
pub(crate) enum ProgramSlot<P> {
    Ready(P),
    Broken,
}

pub(crate) struct ProgramTable<P> {
    next_id: u32,
    programs: HashMap<ProgramId, ProgramSlot<P>>,
    current: Option<ProgramId>,
}

impl<P> ProgramTable<P> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            programs: HashMap::new(),
            current: None,
        }
    }

    pub(crate) fn insert(&mut self, slot: ProgramSlot<P>) -> ProgramId {
        let id = ProgramId(self.next_id);
        self.next_id += 1;
        self.programs.insert(id, slot);
        id
    }

    pub(crate) fn get(&self, id: ProgramId) -> Option<&ProgramSlot<P>> {
        self.programs.get(&id)
    }

    /// Remove a program; removing the current program clears the selection.
    pub(crate) fn remove(&mut self, id: ProgramId) -> bool {
        if self.current == Some(id) {
            self.current = None;
        }
        self.programs.remove(&id).is_some()
    }

    /// Select the implicit program. Unknown ids leave the selection unchanged.
    pub(crate) fn set_current(&mut self, id: ProgramId) -> bool {
        if self.programs.contains_key(&id) {
            self.current = Some(id);
            true
        } else {
            false
        }
    }

    pub(crate) fn current(&self) -> Option<ProgramId> {
        self.current
    }

    pub(crate) fn len(&self) -> usize {
        self.programs.len()
    }

    pub(crate) fn clear(&mut self) {
        self.programs.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_count_from_one_and_are_not_reused() {
        let mut table = ProgramTable::<&str>::new();
        let a = table.insert(ProgramSlot::Ready("a"));
        let b = table.insert(ProgramSlot::Broken);
        assert_eq!(a.to_raw(), 1);
        assert_eq!(b.to_raw(), 2);

        assert!(table.remove(a));
        assert!(!table.remove(a));
        let c = table.insert(ProgramSlot::Ready("c"));
        assert_eq!(c.to_raw(), 3);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_current_selection() {
        let mut table = ProgramTable::<&str>::new();
        let a = table.insert(ProgramSlot::Ready("a"));
        let b = table.insert(ProgramSlot::Ready("b"));
        assert_eq!(table.current(), None);

        assert!(table.set_current(a));
        assert!(!table.set_current(ProgramId::from_raw(99)));
        assert_eq!(table.current(), Some(a));

        assert!(table.remove(b));
        assert_eq!(table.current(), Some(a));
        assert!(table.remove(a));
        assert_eq!(table.current(), None);
    }

    #[test]
    fn test_clear() {
        let mut table = ProgramTable::<&str>::new();
        let a = table.insert(ProgramSlot::Ready("a"));
        table.set_current(a);
        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.current(), None);
        assert!(table.get(a).is_none());
    }
}
