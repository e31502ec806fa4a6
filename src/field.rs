//! Nodal field storage with host and device residency.
//!
//! A [`DualField`] keeps one copy of its values per [`MemorySpace`]. Writes through a mutable
//! view mark the written copy as modified, which makes the other copy stale until it is
//! explicitly synchronized. Checked views refuse to hand out stale data.
use log::trace;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Handle to a field registered with the mesh, resolved once from its name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldOrdinal(pub usize);

impl FieldOrdinal {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemorySpace {
    Host,
    Device,
}

impl MemorySpace {
    pub fn other(&self) -> Self {
        match self {
            Self::Host => Self::Device,
            Self::Device => Self::Host,
        }
    }
}

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldSyncError {
    #[error("the {space:?} copy of the field is stale and must be synchronized before it is accessed")]
    Stale { space: MemorySpace },
}

/// A field with one copy of its values in host memory and one in device memory.
///
/// Values are stored entity by entity, `width` components per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DualField {
    width: usize,
    host: Vec<f64>,
    device: Vec<f64>,
    // The space holding the only up-to-date copy, if the copies differ
    modified: Option<MemorySpace>,
}

impl DualField {
    pub fn new(width: usize, num_entities: usize, initial_value: f64) -> Self {
        assert!(width > 0, "Field width must be positive.");
        let values = vec![initial_value; width * num_entities];
        Self {
            width,
            host: values.clone(),
            device: values,
            modified: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn num_entities(&self) -> usize {
        self.host.len() / self.width
    }

    pub fn is_fresh(&self, space: MemorySpace) -> bool {
        self.modified.map_or(true, |modified| modified == space)
    }

    pub fn need_sync_to(&self, space: MemorySpace) -> bool {
        !self.is_fresh(space)
    }

    /// Brings the copy in `space` up to date. Does nothing if it already is.
    pub fn sync_to(&mut self, space: MemorySpace) {
        if self.need_sync_to(space) {
            trace!("Synchronizing field copy to {:?}", space);
            match space {
                MemorySpace::Host => self.host.copy_from_slice(&self.device),
                MemorySpace::Device => self.device.copy_from_slice(&self.host),
            }
            self.modified = None;
        }
    }

    /// Records that the copy in `space` has been written, making the other copy stale.
    ///
    /// Fails if the copy in `space` was itself stale, since the write would then have been
    /// applied on top of outdated values.
    pub fn modify(&mut self, space: MemorySpace) -> Result<(), FieldSyncError> {
        if self.is_fresh(space) {
            self.modified = Some(space);
            Ok(())
        } else {
            Err(FieldSyncError::Stale { space })
        }
    }

    /// Read access to the copy in `space`, which must be up to date.
    pub fn view(&self, space: MemorySpace) -> Result<FieldView<'_>, FieldSyncError> {
        if self.is_fresh(space) {
            Ok(FieldView {
                values: self.storage(space),
                width: self.width,
            })
        } else {
            Err(FieldSyncError::Stale { space })
        }
    }

    /// Synchronizes `space` if necessary and returns read access to it.
    pub fn synced_view(&mut self, space: MemorySpace) -> FieldView<'_> {
        self.sync_to(space);
        FieldView {
            values: self.storage(space),
            width: self.width,
        }
    }

    /// Write access to the copy in `space`, which must be up to date.
    ///
    /// The copy is marked as modified when the view is dropped.
    pub fn view_mut(&mut self, space: MemorySpace) -> Result<FieldViewMut<'_>, FieldSyncError> {
        if self.is_fresh(space) {
            Ok(FieldViewMut { field: self, space })
        } else {
            Err(FieldSyncError::Stale { space })
        }
    }

    /// The raw values in `space`, regardless of whether they are up to date.
    ///
    /// Intended for diagnostics. Consumers of field data must go through [`view`](Self::view).
    pub fn unsynchronized_view(&self, space: MemorySpace) -> &[f64] {
        self.storage(space)
    }

    fn storage(&self, space: MemorySpace) -> &[f64] {
        match space {
            MemorySpace::Host => &self.host,
            MemorySpace::Device => &self.device,
        }
    }

    fn storage_mut(&mut self, space: MemorySpace) -> &mut [f64] {
        match space {
            MemorySpace::Host => &mut self.host,
            MemorySpace::Device => &mut self.device,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct FieldView<'a> {
    values: &'a [f64],
    width: usize,
}

impl<'a> FieldView<'a> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn entity(&self, index: usize) -> &'a [f64] {
        &self.values[index * self.width..(index + 1) * self.width]
    }

    pub fn get(&self, index: usize, component: usize) -> f64 {
        debug_assert!(component < self.width);
        self.values[index * self.width + component]
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.values
    }
}

impl<'a> Deref for FieldView<'a> {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        self.values
    }
}

#[derive(Debug)]
pub struct FieldViewMut<'a> {
    field: &'a mut DualField,
    space: MemorySpace,
}

impl<'a> FieldViewMut<'a> {
    pub fn width(&self) -> usize {
        self.field.width
    }

    pub fn space(&self) -> MemorySpace {
        self.space
    }

    pub fn entity_mut(&mut self, index: usize) -> &mut [f64] {
        let width = self.field.width;
        &mut self.field.storage_mut(self.space)[index * width..(index + 1) * width]
    }
}

impl<'a> Deref for FieldViewMut<'a> {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        self.field.storage(self.space)
    }
}

impl<'a> DerefMut for FieldViewMut<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.field.storage_mut(self.space)
    }
}

impl<'a> Drop for FieldViewMut<'a> {
    fn drop(&mut self) {
        // The view could only be created for a fresh copy, so this cannot fail
        self.field.modified = Some(self.space);
    }
}
