use std::marker::PhantomData;

/// Mutable access to a single row of a CSR matrix and the matching right-hand side entry.
#[derive(Debug)]
pub struct RowMut<'b, T> {
    pub col_indices: &'b [usize],
    pub values: &'b mut [T],
    pub rhs: &'b mut T,
}

/// Shared access to the rows of a CSR matrix (and a right-hand side vector) that permits
/// mutable access to *different* rows from several threads at once.
///
/// The access borrows the matrix data mutably for its whole lifetime, so it is the only
/// way to reach the data while it exists.
pub struct DisjointRowAccess<'a, T> {
    row_offsets: &'a [usize],
    col_indices: &'a [usize],
    values: *mut T,
    rhs: *mut T,
    marker: PhantomData<&'a mut T>,
}

impl<'a, T> Clone for DisjointRowAccess<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for DisjointRowAccess<'a, T> {}

unsafe impl<'a, T: Send> Sync for DisjointRowAccess<'a, T> {}
unsafe impl<'a, T: Send> Send for DisjointRowAccess<'a, T> {}

impl<'a, T> DisjointRowAccess<'a, T> {
    /// # Panics
    ///
    /// Panics if the CSR arrays are inconsistent with each other or with `rhs`.
    pub fn new(row_offsets: &'a [usize], col_indices: &'a [usize], values: &'a mut [T], rhs: &'a mut [T]) -> Self {
        assert!(!row_offsets.is_empty(), "Row offsets must contain at least one entry.");
        let num_rows = row_offsets.len() - 1;
        assert_eq!(rhs.len(), num_rows, "Right-hand side length must equal the number of rows.");
        assert_eq!(col_indices.len(), values.len());
        assert_eq!(row_offsets[num_rows], values.len());
        Self {
            row_offsets,
            col_indices,
            values: values.as_mut_ptr(),
            rhs: rhs.as_mut_ptr(),
            marker: PhantomData,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    /// Obtains mutable access to the given row.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    ///
    /// # Safety
    ///
    /// While the returned row is alive, no other call may obtain the same row, on this thread
    /// or any other. Element colorings guarantee this for the nodes of elements in one color.
    pub unsafe fn row_mut<'b>(&'b self, row: usize) -> RowMut<'b, T>
    where
        'a: 'b,
    {
        assert!(row < self.num_rows(), "Row index out of bounds.");
        let begin = self.row_offsets[row];
        let end = self.row_offsets[row + 1];
        RowMut {
            col_indices: &self.col_indices[begin..end],
            values: std::slice::from_raw_parts_mut(self.values.add(begin), end - begin),
            rhs: &mut *self.rhs.add(row),
        }
    }
}
