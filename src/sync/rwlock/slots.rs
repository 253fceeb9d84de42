/*!
 * Lock Token Slot Table
 *
 * Granted tokens live in a generational slot table so that release can
 * validate a token with one indexed lookup. A freed slot bumps its
 * generation, which turns every outstanding copy of the old token stale.
 */

use super::LockKind;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    kind: Option<LockKind>,
}

#[derive(Debug, Default)]
pub(super) struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl SlotTable {
    /// Occupy a slot, returning `(index, generation)`
    pub(super) fn insert(&mut self, kind: LockKind) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.kind = Some(kind);
            return (index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            kind: Some(kind),
        });
        (index, 0)
    }

    /// Kind held in the slot if `generation` is still current
    #[inline]
    pub(super) fn get(&self, index: u32, generation: u32) -> Option<LockKind> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.kind)
    }

    /// Free the slot if `generation` is still current
    pub(super) fn remove(&mut self, index: u32, generation: u32) -> Option<LockKind> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let kind = slot.kind.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(kind)
    }

    /// Number of occupied slots
    pub(super) fn occupied(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
