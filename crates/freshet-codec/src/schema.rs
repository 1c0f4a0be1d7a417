use crate::error::CodecError;

/// Maximum serialized column-name length, analogous to the database's
/// fixed-width name type.
pub const MAX_COLUMN_NAME_LEN: usize = 64;

/// One column of a tuple schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
    /// Catalog type id.
    pub type_id: u32,
    /// Type modifier; for composite columns this keys the nested schema.
    pub type_mod: i32,
    /// Collation id.
    pub collation: u32,
}

/// Ordered column descriptions for the rows of a microbatch.
///
/// Shipped inline in WorkerRows batches so that a consumer can interpret
/// row bytes without a catalog round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleSchema {
    pub columns: Vec<ColumnDesc>,
}

impl TupleSchema {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        Self { columns }
    }

    /// Rejects column names the wire format cannot carry.
    pub fn validate(&self) -> Result<(), CodecError> {
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(CodecError::InvalidBatch("column name must not be empty"));
            }
            if column.name.len() > MAX_COLUMN_NAME_LEN {
                return Err(CodecError::InvalidBatch("column name too long"));
            }
        }
        Ok(())
    }

    /// Conservative upper bound on this schema's packed size, used when a
    /// builder reserves budget headroom before any row is added.
    pub fn max_packed_size(&self) -> usize {
        // column count + per column: name length prefix, max name bytes,
        // type id, type mod, collation.
        4 + self.columns.len() * (4 + MAX_COLUMN_NAME_LEN + 4 + 4 + 4)
    }
}
