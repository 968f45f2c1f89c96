use crate::FileRequest;

/// Identifies a request owned by the scheduler. Ids are never reused for a different request, a
/// slot that is recycled gets a new generation so stale ids stop resolving.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct RequestId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for RequestId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct ArenaSlot {
    generation: u32,
    request: Option<FileRequest>,
}

#[derive(Default)]
pub(crate) struct RequestArena {
    slots: Vec<ArenaSlot>,
    free_list: Vec<u32>,
    len: usize,
}

impl RequestArena {
    pub fn insert(
        &mut self,
        request: FileRequest,
    ) -> RequestId {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.request.is_none());
            slot.request = Some(request);
            return RequestId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(ArenaSlot {
            generation: 0,
            request: Some(request),
        });
        RequestId {
            index,
            generation: 0,
        }
    }

    pub fn get(
        &self,
        id: RequestId,
    ) -> Option<&FileRequest> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.request.as_ref()
    }

    pub fn get_mut(
        &mut self,
        id: RequestId,
    ) -> Option<&mut FileRequest> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.request.as_mut()
    }

    pub fn remove(
        &mut self,
        id: RequestId,
    ) -> Option<FileRequest> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let request = slot.request.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        self.len -= 1;
        Some(request)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = (RequestId, &FileRequest)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.request.as_ref().map(|request| {
                (
                    RequestId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    request,
                )
            })
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Command;

    #[test]
    fn stale_ids_do_not_resolve() {
        let mut arena = RequestArena::default();
        let first = arena.insert(FileRequest::new(Command::FlushAll));
        assert!(arena.get(first).is_some());
        assert!(arena.remove(first).is_some());
        assert!(arena.get(first).is_none());
        assert!(arena.remove(first).is_none());

        // The slot is recycled under a new generation
        let second = arena.insert(FileRequest::new(Command::FlushAll));
        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut arena = RequestArena::default();
        let a = arena.insert(FileRequest::new(Command::FlushAll));
        let b = arena.insert(FileRequest::new(Command::FlushAll));
        let c = arena.insert(FileRequest::new(Command::FlushAll));
        arena.remove(b);
        let ids: Vec<_> = arena.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, c]);
    }
}
