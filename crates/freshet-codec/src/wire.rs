use bytes::{BufMut, Bytes, BytesMut};
use freshet_core::{AckRef, BatchKind, ProcessId, QuerySet};

use crate::batch::{DecodedRow, Microbatch, MicrobatchBuilder};
use crate::error::CodecError;
use crate::schema::{ColumnDesc, TupleSchema};

/// Length of the recipient prefix prepended by [`pack_for_relay`].
pub const RELAY_PREFIX_LEN: usize = 8;

/// Serializes a batch to its wire form.
///
/// Layout, all integers little-endian: kind tag, ack count and packed ack
/// references, row count, concatenated self-describing rows, then a
/// kind-specific trailer (schemas and query bitmap for WorkerRows, the
/// single query id for CombinerRows, nothing for Flush).
pub fn pack_microbatch(mb: &MicrobatchBuilder) -> Result<Bytes, CodecError> {
    let mut out = BytesMut::with_capacity(64 + mb.buf.len());

    out.put_u8(mb.kind.to_u8());

    out.put_u32_le(mb.acks.len() as u32);
    for ack in &mb.acks {
        out.put_u64_le(ack.tag);
        out.put_u64_le(ack.slot);
    }

    out.put_u32_le(mb.nrows);
    out.put_slice(&mb.buf);

    match mb.kind {
        BatchKind::WorkerRows => {
            let schema = mb
                .schema
                .as_ref()
                .ok_or(CodecError::InvalidBatch("worker batch requires a schema"))?;
            pack_schema(&mut out, schema);

            out.put_u32_le(mb.record_schemas.len() as u32);
            for (type_mod, nested) in &mb.record_schemas {
                out.put_i32_le(*type_mod);
                pack_schema(&mut out, nested);
            }

            let words = mb.queries.words();
            out.put_u32_le(words.len() as u32);
            for word in words {
                out.put_u64_le(*word);
            }
        }
        BatchKind::CombinerRows => {
            let id = mb
                .queries
                .first()
                .ok_or(CodecError::InvalidBatch("combiner batch has no query"))?;
            out.put_u32_le(id);
        }
        BatchKind::Flush => {}
    }

    // The builder's budget accounting guarantees this; re-check rather
    // than ship an overweight batch.
    if out.len() > mb.byte_budget() {
        return Err(CodecError::InvalidBatch("packed batch exceeds byte budget"));
    }

    Ok(out.freeze())
}

/// Decodes a packed batch into a read-only [`Microbatch`].
///
/// Row entries are views into `buf`; the underlying buffer is shared, not
/// copied. Any declared count or length that disagrees with the buffer's
/// actual size is a decode error, never an out-of-bounds read.
pub fn unpack_microbatch(buf: Bytes) -> Result<Microbatch, CodecError> {
    let mut r = Reader::new(buf);

    let kind = BatchKind::from_u8(r.u8("kind tag")?)
        .ok_or(CodecError::InvalidBatch("unknown batch kind tag"))?;

    let ack_count = r.u32("ack count")?;
    // Counts come from the wire; never pre-reserve from them.
    let mut acks = Vec::new();
    for _ in 0..ack_count {
        let tag = r.u64("ack tag")?;
        let slot = r.u64("ack slot")?;
        acks.push(AckRef { slot, tag });
    }

    let row_count = r.u32("row count")?;
    let mut rows = Vec::new();
    for _ in 0..row_count {
        let len = r.u32("row length")? as usize;
        let data = r.take(len, "row body")?;
        let group_hash = if kind == BatchKind::CombinerRows {
            r.u64("row group hash")?
        } else {
            0
        };
        rows.push(DecodedRow { data, group_hash });
    }

    let mut schema = None;
    let mut record_schemas = Vec::new();
    let queries = match kind {
        BatchKind::WorkerRows => {
            schema = Some(unpack_schema(&mut r)?);

            let nested_count = r.u32("record schema count")?;
            for _ in 0..nested_count {
                let type_mod = r.i32("record type mod")?;
                record_schemas.push((type_mod, unpack_schema(&mut r)?));
            }

            let word_count = r.u32("query bitmap length")?;
            let mut words = Vec::new();
            for _ in 0..word_count {
                words.push(r.u64("query bitmap word")?);
            }
            let queries = QuerySet::from_words(words);
            if queries.is_empty() {
                return Err(CodecError::InvalidBatch("worker batch has no queries"));
            }
            queries
        }
        BatchKind::CombinerRows => QuerySet::singleton(r.u32("query id")?),
        BatchKind::Flush => QuerySet::new(),
    };

    r.finish()?;

    Ok(Microbatch {
        kind,
        queries,
        acks,
        rows,
        schema,
        record_schemas,
    })
}

/// Prepends the final recipient id to an already-packed batch, for
/// forwarding through a relay process that learns the destination from the
/// frame itself.
pub fn pack_for_relay(recipient: ProcessId, packed: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(RELAY_PREFIX_LEN + packed.len());
    out.put_u64_le(recipient);
    out.put_slice(packed);
    out.freeze()
}

/// Relay-side mirror of [`pack_for_relay`]: splits a frame into the final
/// recipient and the untouched packed batch.
pub fn unpack_relay_frame(frame: Bytes) -> Result<(ProcessId, Bytes), CodecError> {
    if frame.len() < RELAY_PREFIX_LEN {
        return Err(CodecError::Truncated("relay recipient prefix"));
    }
    let mut prefix = [0_u8; RELAY_PREFIX_LEN];
    prefix.copy_from_slice(&frame[..RELAY_PREFIX_LEN]);
    let recipient = u64::from_le_bytes(prefix);
    Ok((recipient, frame.slice(RELAY_PREFIX_LEN..)))
}

fn pack_schema(out: &mut BytesMut, schema: &TupleSchema) {
    out.put_u32_le(schema.columns.len() as u32);
    for column in &schema.columns {
        out.put_u32_le(column.name.len() as u32);
        out.put_slice(column.name.as_bytes());
        out.put_u32_le(column.type_id);
        out.put_i32_le(column.type_mod);
        out.put_u32_le(column.collation);
    }
}

fn unpack_schema(r: &mut Reader) -> Result<TupleSchema, CodecError> {
    let ncols = r.u32("column count")?;
    let mut columns = Vec::new();
    for _ in 0..ncols {
        let name_len = r.u32("column name length")? as usize;
        let name_bytes = r.take(name_len, "column name")?;
        let name = std::str::from_utf8(&name_bytes)
            .map_err(|_| CodecError::InvalidBatch("column name is not valid utf-8"))?
            .to_string();
        columns.push(ColumnDesc {
            name,
            type_id: r.u32("column type id")?,
            type_mod: r.i32("column type mod")?,
            collation: r.u32("column collation")?,
        });
    }
    let schema = TupleSchema::new(columns);
    schema.validate()?;
    Ok(schema)
}

/// Bounds-checked cursor over a shared receive buffer.
struct Reader {
    buf: Bytes,
    pos: usize,
}

impl Reader {
    fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        let bytes = self.take(1, what)?;
        Ok(bytes[0])
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        let bytes = self.take(4, what)?;
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(&bytes);
        Ok(u32::from_le_bytes(raw))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32, CodecError> {
        let bytes = self.take(4, what)?;
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(&bytes);
        Ok(i32::from_le_bytes(raw))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        let bytes = self.take(8, what)?;
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Returns a zero-copy slice of the next `len` bytes.
    fn take(&mut self, len: usize, what: &'static str) -> Result<Bytes, CodecError> {
        if self.buf.len() - self.pos < len {
            return Err(CodecError::Truncated(what));
        }
        let slice = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(slice)
    }

    /// Declared contents must account for the whole buffer.
    fn finish(self) -> Result<(), CodecError> {
        if self.pos != self.buf.len() {
            return Err(CodecError::TrailingBytes {
                consumed: self.pos,
                len: self.buf.len(),
            });
        }
        Ok(())
    }
}
