// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoded picture buffer backed by an arena of pictures.
//!
//! Pictures live in arena slots addressed by a [`PicId`]. The DPB membership list, the decoder's
//! current picture and pending codec frames all refer to pictures by id, and each of them holds
//! one reference on the slot. A slot is reclaimed, and its backend handle handed back, when its
//! last reference is released.

use log::debug;
use thiserror::Error;

use crate::codec::h264::picture::PictureData;

/// The maximum number of pictures in the DPB, as per A.3.1, clause h)
pub const DPB_MAX_SIZE: usize = 16;

/// Stable index of a picture in the arena of a [`Dpb`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PicId(usize);

impl PicId {
    pub fn index(&self) -> usize {
        self.0
    }
}

struct Slot<T> {
    pic: PictureData,
    handle: Option<T>,
    refcount: usize,
}

/// A picture stored in the DPB, as yielded by [`Dpb::entries`].
///
/// `handle` can be `None` if no backend resource was ever attached to the picture, e.g. for
/// non-existing frames.
pub struct DpbEntry<'a, T> {
    pub id: PicId,
    pub pic: &'a PictureData,
    pub handle: Option<&'a T>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorePictureError {
    #[error("DPB is full")]
    DpbIsFull,
    #[error("picture {0:?} does not exist")]
    UnknownPicture(PicId),
    #[error("picture {0:?} is already in the DPB")]
    AlreadyStored(PicId),
}

pub struct Dpb<T> {
    /// Picture slots. `None` marks a reclaimed slot waiting to be reused.
    arena: Vec<Option<Slot<T>>>,
    /// Reclaimed slot indices, reused before the arena grows.
    free_slots: Vec<usize>,
    /// DPB members, in the order they were stored.
    entries: Vec<PicId>,
    /// The maximum number of pictures that can be stored.
    max_num_pics: usize,
}

impl<T> Default for Dpb<T> {
    fn default() -> Self {
        Self::new(DPB_MAX_SIZE)
    }
}

impl<T> Dpb<T> {
    pub fn new(max_num_pics: usize) -> Self {
        Self {
            arena: Default::default(),
            free_slots: Default::default(),
            entries: Default::default(),
            max_num_pics,
        }
    }

    fn slot(&self, id: PicId) -> Option<&Slot<T>> {
        self.arena.get(id.0).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: PicId) -> Option<&mut Slot<T>> {
        self.arena.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Adds `pic` to the arena. The picture is not a DPB member yet and holds no reference.
    pub fn new_picture(&mut self, pic: PictureData) -> PicId {
        let slot = Slot {
            pic,
            handle: None,
            refcount: 0,
        };

        match self.free_slots.pop() {
            Some(index) => {
                self.arena[index] = Some(slot);
                PicId(index)
            }
            None => {
                self.arena.push(Some(slot));
                PicId(self.arena.len() - 1)
            }
        }
    }

    pub fn picture(&self, id: PicId) -> Option<&PictureData> {
        self.slot(id).map(|slot| &slot.pic)
    }

    pub fn picture_mut(&mut self, id: PicId) -> Option<&mut PictureData> {
        self.slot_mut(id).map(|slot| &mut slot.pic)
    }

    /// Returns the backend handle attached to picture `id`, if any.
    pub fn handle(&self, id: PicId) -> Option<&T> {
        self.slot(id).and_then(|slot| slot.handle.as_ref())
    }

    /// Attaches `handle` to picture `id`, returning the handle it replaces. Gives `handle` back
    /// as an error if the picture does not exist.
    pub fn set_handle(&mut self, id: PicId, handle: T) -> Result<Option<T>, T> {
        match self.slot_mut(id) {
            Some(slot) => Ok(slot.handle.replace(handle)),
            None => Err(handle),
        }
    }

    /// Takes one reference on picture `id`. Returns `false` if the picture does not exist.
    pub fn retain(&mut self, id: PicId) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.refcount += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference on picture `id`. When no reference remains the slot is reclaimed and
    /// the picture's handle, if any, is returned.
    pub fn release(&mut self, id: PicId) -> Option<T> {
        let slot = self.slot_mut(id)?;
        slot.refcount = slot.refcount.saturating_sub(1);
        if slot.refcount > 0 {
            return None;
        }

        debug!("Reclaiming picture slot {}", id.0);
        let slot = self.arena[id.0].take()?;
        self.free_slots.push(id.0);
        slot.handle
    }

    /// Returns the number of references currently held on picture `id`.
    pub fn refcount(&self, id: PicId) -> usize {
        self.slot(id).map(|slot| slot.refcount).unwrap_or(0)
    }

    /// Returns the number of pictures alive in the arena, DPB members or not.
    pub fn num_live_pictures(&self) -> usize {
        self.arena.len() - self.free_slots.len()
    }

    /// Makes picture `id` a DPB member. The DPB holds a reference on its members.
    pub fn store_picture(&mut self, id: PicId) -> Result<(), StorePictureError> {
        if self.slot(id).is_none() {
            return Err(StorePictureError::UnknownPicture(id));
        }
        if self.contains(id) {
            return Err(StorePictureError::AlreadyStored(id));
        }
        if self.entries.len() >= self.max_num_pics {
            return Err(StorePictureError::DpbIsFull);
        }

        self.retain(id);
        self.entries.push(id);
        debug!("Stored picture {:?}, DPB size is now {}", id, self.entries.len());

        Ok(())
    }

    /// Removes picture `id` from the DPB, releasing the DPB's reference. Returns the picture's
    /// handle if that was the last reference.
    pub fn remove(&mut self, id: PicId) -> Option<T> {
        let position = self.entries.iter().position(|entry| *entry == id)?;
        self.entries.remove(position);
        self.release(id)
    }

    /// Removes all members, returning the handles of the pictures that got reclaimed.
    pub fn clear(&mut self) -> Vec<T> {
        let entries = std::mem::take(&mut self.entries);
        entries
            .into_iter()
            .filter_map(|id| self.release(id))
            .collect()
    }

    pub fn contains(&self, id: PicId) -> bool {
        self.entries.contains(&id)
    }

    /// Returns the DPB members in enumeration order.
    pub fn entries(&self) -> impl Iterator<Item = DpbEntry<'_, T>> {
        self.entries.iter().filter_map(move |id| {
            self.slot(*id).map(|slot| DpbEntry {
                id: *id,
                pic: &slot.pic,
                handle: slot.handle.as_ref(),
            })
        })
    }

    /// Returns an iterator over the pictures stored in the DPB.
    pub fn pictures(&self) -> impl Iterator<Item = &PictureData> {
        self.entries().map(|entry| entry.pic)
    }

    /// Returns the length of the DPB.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a reference to the dpb's max num pics.
    pub fn max_num_pics(&self) -> usize {
        self.max_num_pics
    }

    pub fn set_max_num_pics(&mut self, max_num_pics: usize) {
        self.max_num_pics = max_num_pics;
    }

    /// Returns the number of members used for reference.
    pub fn num_ref_frames(&self) -> usize {
        self.pictures().filter(|p| p.is_ref()).count()
    }
}
