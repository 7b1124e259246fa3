//! ZipList: a sequence of byte strings and integers packed into one
//! contiguous buffer.
//!
//! Layout: a 10-byte header (total length, offset of the last entry and
//! entry count, all little endian), the entries, and a single `0xFF` end
//! marker. Every entry starts with the size of its predecessor, which is
//! what makes backward traversal possible; see [`crate::zip_encoding`] for
//! the byte formats.
//!
//! Positions are byte offsets ([`Position`]). Any mutation may move bytes
//! around, so positions obtained before a mutation are stale afterwards;
//! mutating calls return the position that is valid after them.
//!
//! Predecessor-length fields are always kept at their minimal width. When
//! an entry changes size the following fields are widened or narrowed in
//! turn until one keeps its width, so the buffer depends only on the list
//! contents and never on the sequence of edits that produced them.

use crate::alloc::{out_of_memory, Allocator, Block};
use crate::error::DecodeError;
use crate::zip_encoding::{
    decode_entry, encode_prevlen, parse_i64, read_int, Encoded, Entry, ListHeader,
    COUNT_SATURATED, END, HEADER_SIZE,
};
use core::fmt::{self, Write as _};

/// Byte offset of an entry (or of the end marker) inside a [`ZipList`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(usize);

impl Position {
    /// Wrap a raw offset, e.g. one stored alongside the buffer. It is
    /// checked when used.
    pub fn from_offset(offset: usize) -> Self {
        Position(offset)
    }

    pub fn offset(self) -> usize {
        self.0
    }
}

/// Which end [`ZipList::push`] inserts at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum End {
    Head,
    Tail,
}

/// A decoded entry: a borrowed string payload or an integer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ZipValue<'a> {
    Bytes(&'a [u8]),
    Int(i64),
}

impl ZipValue<'_> {
    /// The bytes this value was pushed as; integers render in decimal.
    pub fn to_vec(&self) -> Vec<u8> {
        match *self {
            ZipValue::Bytes(b) => b.to_vec(),
            ZipValue::Int(v) => v.to_string().into_bytes(),
        }
    }
}

pub struct ZipList {
    block: Block,
}

impl Default for ZipList {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipList {
    pub fn new() -> Self {
        Self::new_in(&Allocator::default())
    }

    pub fn new_in(alloc: &Allocator) -> Self {
        let mut block = alloc.alloc_zeroed(HEADER_SIZE + 1);
        let buf = block.as_mut_slice();
        ListHeader::empty().write(buf);
        buf[HEADER_SIZE] = END;
        Self { block }
    }

    /// Adopt a serialized list after checking its whole structure.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        Self::from_bytes_in(bytes, &Allocator::default())
    }

    pub fn from_bytes_in(bytes: Vec<u8>, alloc: &Allocator) -> Result<Self, DecodeError> {
        validate(&bytes)?;
        Ok(Self {
            block: Block::from_vec(bytes, alloc),
        })
    }

    /// Number of entries. Walks the list once the stored count has
    /// saturated.
    pub fn len(&self) -> usize {
        let stored = self.header().count;
        if stored < COUNT_SATURATED {
            return stored as usize;
        }
        self.count_entries().expect("entries of a validated list decode")
    }

    pub fn is_empty(&self) -> bool {
        self.end_offset() == HEADER_SIZE
    }

    /// Size of the whole buffer in bytes.
    pub fn blob_len(&self) -> usize {
        self.block.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.block
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.block.into_vec()
    }

    pub fn allocator(&self) -> &Allocator {
        self.block.allocator()
    }

    pub fn push(&mut self, value: &[u8], end: End) -> Result<Position, DecodeError> {
        let p = match end {
            End::Head => HEADER_SIZE,
            End::Tail => self.end_offset(),
        };
        self.insert_at(p, value)
    }

    /// Insert `value` so that it occupies `before`, shifting the entry
    /// there (if any) one place back. Returns the position of the new
    /// entry. `before` must start an entry or be the end marker, otherwise
    /// `DecodeError::NotAnEntry` is returned and nothing changes.
    pub fn insert(&mut self, before: Position, value: &[u8]) -> Result<Position, DecodeError> {
        let p = self.boundary(before)?;
        self.insert_at(p, value)
    }

    /// Remove the entry at `pos`. Returns the position of the entry that
    /// followed it (or of the end marker).
    pub fn delete(&mut self, pos: Position) -> Result<Position, DecodeError> {
        self.delete_range(pos, 1)
    }

    /// Remove up to `count` consecutive entries starting at `pos`.
    pub fn delete_range(&mut self, pos: Position, count: usize) -> Result<Position, DecodeError> {
        let p = self.boundary(pos)?;
        self.delete_range_at(p, count)
    }

    /// Overwrite the entry at `pos` with `value`. The end marker cannot be
    /// replaced.
    pub fn replace(&mut self, pos: Position, value: &[u8]) -> Result<Position, DecodeError> {
        let p = self.boundary(pos)?;
        if p == self.end_offset() {
            return Err(DecodeError::OutOfBounds { offset: p });
        }
        let p = self.delete_range_at(p, 1)?;
        self.insert_at(p.0, value)
    }

    fn delete_range_at(&mut self, p: usize, count: usize) -> Result<Position, DecodeError> {
        let end = self.end_offset();
        if p == end || count == 0 {
            return Ok(Position(p));
        }
        let first = self.entry_at(p)?;
        let mut q = p;
        let mut deleted = 0usize;
        while q != end && deleted < count {
            q += self.entry_at(q)?.size();
            deleted += 1;
        }
        let removed = q - p;

        let mut header = self.header();
        let mut nextdiff = 0isize;
        if q != end {
            // The survivor after the gap now follows `first`'s predecessor.
            let next = self.entry_at(q)?;
            let (field, width) = encode_prevlen(first.prev_len);
            nextdiff = width as isize - next.prev_len_size as isize;
            self.block.splice(p..q + next.prev_len_size, &field[..width]);
            header.tail = if header.tail == q {
                p
            } else {
                (header.tail as isize - removed as isize + nextdiff) as usize
            };
        } else {
            self.block.splice(p..q, &[]);
            header.tail = p - first.prev_len;
        }
        header.total_len = self.blob_len();
        let saturated = header.count == COUNT_SATURATED;
        if !saturated {
            header.count = header.count.saturating_sub(deleted as u16);
        }
        self.set_header(header);

        if nextdiff != 0 {
            self.cascade(p)?;
        }
        if saturated {
            // Recount; an exact count is stored again once it fits.
            let n = self.count_entries()?;
            if n < COUNT_SATURATED as usize {
                let mut header = self.header();
                header.count = n as u16;
                self.set_header(header);
            }
        }
        Ok(Position(p))
    }

    /// Position of the `n`th entry; negative `n` counts from the tail
    /// (`-1` is the last entry).
    pub fn index(&self, n: isize) -> Result<Option<Position>, DecodeError> {
        let end = self.end_offset();
        if n >= 0 {
            let mut p = HEADER_SIZE;
            for _ in 0..n {
                if p == end {
                    return Ok(None);
                }
                p += self.entry_at(p)?.size();
            }
            return Ok((p != end).then_some(Position(p)));
        }

        let mut p = self.header().tail;
        if p == end {
            return Ok(None);
        }
        for _ in 1..n.unsigned_abs() {
            if p == HEADER_SIZE {
                return Ok(None);
            }
            p = self.prev_offset(p)?;
        }
        Ok(Some(Position(p)))
    }

    /// The entry after `pos`, or `None` past the last entry.
    pub fn next(&self, pos: Position) -> Result<Option<Position>, DecodeError> {
        let p = self.check(pos)?;
        let end = self.end_offset();
        if p == end {
            return Ok(None);
        }
        let np = p + self.entry_at(p)?.size();
        Ok((np != end).then_some(Position(np)))
    }

    /// The entry before `pos`. From the end marker this is the last entry;
    /// from the head it is `None`.
    pub fn prev(&self, pos: Position) -> Result<Option<Position>, DecodeError> {
        let p = self.check(pos)?;
        if p == self.end_offset() {
            let tail = self.header().tail;
            return Ok((tail != p).then_some(Position(tail)));
        }
        if p == HEADER_SIZE {
            return Ok(None);
        }
        Ok(Some(Position(self.prev_offset(p)?)))
    }

    pub fn get(&self, pos: Position) -> Result<Option<ZipValue<'_>>, DecodeError> {
        let p = self.check(pos)?;
        if p == self.end_offset() {
            return Ok(None);
        }
        let e = self.entry_at(p)?;
        Ok(Some(self.value_of(&e)))
    }

    /// Decoded layout of the entry at `pos`.
    pub fn entry(&self, pos: Position) -> Result<Option<Entry>, DecodeError> {
        let p = self.check(pos)?;
        if p == self.end_offset() {
            return Ok(None);
        }
        self.entry_at(p).map(Some)
    }

    /// Whether the entry at `pos` equals `s`. Integer entries match only
    /// inputs that are themselves canonical integers of the same value.
    pub fn compare(&self, pos: Position, s: &[u8]) -> Result<bool, DecodeError> {
        Ok(match self.get(pos)? {
            None => false,
            Some(ZipValue::Bytes(b)) => b == s,
            Some(ZipValue::Int(v)) => parse_i64(s) == Some(v),
        })
    }

    /// First entry at or after `pos` equal to `needle`, comparing only every
    /// `skip + 1`th entry.
    pub fn find(
        &self,
        pos: Position,
        needle: &[u8],
        skip: usize,
    ) -> Result<Option<Position>, DecodeError> {
        let mut p = self.check(pos)?;
        let end = self.end_offset();
        // Parsed on the first integer entry compared.
        let mut needle_int: Option<Option<i64>> = None;
        let mut skip_left = 0;
        while p != end {
            let e = self.entry_at(p)?;
            if skip_left == 0 {
                let hit = match self.value_of(&e) {
                    ZipValue::Bytes(b) => b == needle,
                    ZipValue::Int(v) => {
                        *needle_int.get_or_insert_with(|| parse_i64(needle)) == Some(v)
                    }
                };
                if hit {
                    return Ok(Some(Position(p)));
                }
                skip_left = skip;
            } else {
                skip_left -= 1;
            }
            p += e.size();
        }
        Ok(None)
    }

    pub fn iter(&self) -> Values<'_> {
        Values {
            list: self,
            pos: HEADER_SIZE,
        }
    }

    /// Human-readable dump of the header and every entry.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_repr(&mut out);
        out
    }

    fn write_repr(&self, out: &mut String) -> fmt::Result {
        let h = self.header();
        writeln!(out, "{{total bytes {}}} {{num entries {}}}", h.total_len, h.count)?;
        writeln!(out, "{{tail offset {}}}", h.tail)?;
        let end = self.end_offset();
        let mut p = HEADER_SIZE;
        let mut index = 0;
        while p != end {
            let e = match self.entry_at(p) {
                Ok(e) => e,
                Err(err) => return writeln!(out, "{{corrupt: {err}}}"),
            };
            writeln!(out, "{{")?;
            writeln!(
                out,
                "\tindex {index}, offset {}, size {}, prevlen {} ({} bytes), \
                 encoding {:?} ({} bytes), payload {} bytes",
                e.offset,
                e.size(),
                e.prev_len,
                e.prev_len_size,
                e.encoding,
                e.header_len,
                e.payload_len
            )?;
            match self.value_of(&e) {
                ZipValue::Bytes(b) if b.len() > 40 => {
                    writeln!(out, "\t[str]{}...", String::from_utf8_lossy(&b[..40]))?
                }
                ZipValue::Bytes(b) => writeln!(out, "\t[str]{}", String::from_utf8_lossy(b))?,
                ZipValue::Int(v) => writeln!(out, "\t[int]{v}")?,
            }
            writeln!(out, "}}")?;
            p += e.size();
            index += 1;
        }
        writeln!(out, "{{end}}")
    }

    fn header(&self) -> ListHeader {
        ListHeader::load(&self.block)
    }

    fn set_header(&mut self, header: ListHeader) {
        header.write(self.block.as_mut_slice());
    }

    #[inline]
    fn end_offset(&self) -> usize {
        self.block.len() - 1
    }

    fn check(&self, pos: Position) -> Result<usize, DecodeError> {
        let p = pos.0;
        if p < HEADER_SIZE || p > self.end_offset() {
            return Err(DecodeError::OutOfBounds { offset: p });
        }
        Ok(p)
    }

    /// Like `check`, and additionally requires `pos` to start an entry (or
    /// to be the end marker). Walks from the head.
    fn boundary(&self, pos: Position) -> Result<usize, DecodeError> {
        let p = self.check(pos)?;
        if p == self.end_offset() || p == self.header().tail {
            return Ok(p);
        }
        let mut q = HEADER_SIZE;
        while q < p {
            q += self.entry_at(q)?.size();
        }
        if q != p {
            return Err(DecodeError::NotAnEntry { offset: p });
        }
        Ok(p)
    }

    fn count_entries(&self) -> Result<usize, DecodeError> {
        let end = self.end_offset();
        let mut p = HEADER_SIZE;
        let mut n = 0;
        while p != end {
            p += self.entry_at(p)?.size();
            n += 1;
        }
        Ok(n)
    }

    fn entry_at(&self, p: usize) -> Result<Entry, DecodeError> {
        decode_entry(&self.block, p, self.end_offset())
    }

    fn prev_offset(&self, p: usize) -> Result<usize, DecodeError> {
        let prev_len = self.entry_at(p)?.prev_len;
        p.checked_sub(prev_len)
            .filter(|&q| q >= HEADER_SIZE && q < p)
            .ok_or(DecodeError::OutOfBounds { offset: p })
    }

    fn value_of(&self, e: &Entry) -> ZipValue<'_> {
        let payload = e.payload(&self.block);
        if e.encoding.is_str() {
            ZipValue::Bytes(payload)
        } else {
            ZipValue::Int(read_int(e.encoding, payload))
        }
    }

    /// The total length field is 32 bits wide; a list that would outgrow it
    /// is treated like a failed allocation.
    fn ensure_fits(&self, new_len: usize) {
        if new_len > u32::MAX as usize {
            out_of_memory(new_len);
        }
    }

    fn insert_at(&mut self, p: usize, value: &[u8]) -> Result<Position, DecodeError> {
        let mut header = self.header();
        let at_end = p == self.end_offset();
        let next = if at_end { None } else { Some(self.entry_at(p)?) };
        let prev_len = match next {
            Some(e) => e.prev_len,
            None if header.tail != p => self.entry_at(header.tail)?.size(),
            None => 0,
        };

        let mut bytes = Encoded::classify(value).to_entry(prev_len);
        let reqlen = bytes.len();
        // The entry currently at `p` gets a predecessor-length field sized
        // for the new entry; it is written as part of the same splice.
        let (replaced, nextdiff) = match next {
            Some(e) => {
                let (field, width) = encode_prevlen(reqlen);
                bytes.extend_from_slice(&field[..width]);
                (e.prev_len_size, width as isize - e.prev_len_size as isize)
            }
            None => (0, 0),
        };
        self.ensure_fits(self.blob_len() + bytes.len() - replaced);
        self.block.splice(p..p + replaced, &bytes);

        header.total_len = self.blob_len();
        header.tail = if at_end {
            p
        } else if header.tail == p {
            p + reqlen
        } else {
            (header.tail as isize + reqlen as isize + nextdiff) as usize
        };
        if header.count < COUNT_SATURATED {
            header.count += 1;
        }
        self.set_header(header);

        if nextdiff != 0 {
            self.cascade(p + reqlen)?;
        }
        Ok(Position(p))
    }

    /// The entry at `p` changed size: bring the predecessor-length fields
    /// after it back in line, stopping at the first one whose width holds.
    fn cascade(&mut self, mut p: usize) -> Result<(), DecodeError> {
        let mut resized = 0usize;
        while p != self.end_offset() {
            let size = self.entry_at(p)?.size();
            let np = p + size;
            if np == self.end_offset() {
                break;
            }
            let next = self.entry_at(np)?;
            let (field, width) = encode_prevlen(size);
            if next.prev_len_size == width {
                if next.prev_len != size {
                    self.block.as_mut_slice()[np..np + width].copy_from_slice(&field[..width]);
                }
                break;
            }

            let mut header = self.header();
            if width > next.prev_len_size {
                self.ensure_fits(self.blob_len() + width - next.prev_len_size);
            }
            self.block.splice(np..np + next.prev_len_size, &field[..width]);
            if header.tail != np {
                header.tail = (header.tail as isize + width as isize
                    - next.prev_len_size as isize) as usize;
            }
            header.total_len = self.blob_len();
            self.set_header(header);
            resized += 1;
            p = np;
        }
        if resized > 1 {
            log::trace!("ziplist cascade resized {resized} predecessor-length fields");
        }
        Ok(())
    }
}

/// Structural check of a complete buffer.
fn validate(buf: &[u8]) -> Result<(), DecodeError> {
    let header = ListHeader::read(buf)?;
    if header.total_len != buf.len() {
        return Err(DecodeError::LengthMismatch {
            stored: header.total_len,
            actual: buf.len(),
        });
    }
    let end = buf.len() - 1;
    if buf[end] != END {
        return Err(DecodeError::MissingEnd);
    }

    let mut p = HEADER_SIZE;
    let mut prev_size = 0;
    let mut last = HEADER_SIZE;
    let mut count = 0usize;
    while p != end {
        let e = decode_entry(buf, p, end)?;
        if e.prev_len != prev_size {
            return Err(DecodeError::PrevLenMismatch {
                offset: p,
                stored: e.prev_len,
                actual: prev_size,
            });
        }
        prev_size = e.size();
        last = p;
        p += prev_size;
        count += 1;
    }

    if header.tail != last {
        return Err(DecodeError::TailMismatch {
            stored: header.tail,
            actual: last,
        });
    }
    // A saturated count says nothing about the real one.
    if header.count < COUNT_SATURATED && header.count as usize != count {
        return Err(DecodeError::CountMismatch {
            stored: header.count as usize,
            actual: count,
        });
    }
    Ok(())
}

impl Clone for ZipList {
    fn clone(&self) -> Self {
        Self {
            block: self.block.clone(),
        }
    }
}

impl PartialEq for ZipList {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ZipList {}

impl fmt::Debug for ZipList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Forward iterator over decoded entries. Yields one error and stops if
/// an entry fails to decode.
pub struct Values<'a> {
    list: &'a ZipList,
    pos: usize,
}

impl<'a> Iterator for Values<'a> {
    type Item = Result<ZipValue<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let list = self.list;
        let end = list.end_offset();
        if self.pos == end {
            return None;
        }
        match list.entry_at(self.pos) {
            Ok(e) => {
                self.pos += e.size();
                Some(Ok(list.value_of(&e)))
            }
            Err(err) => {
                self.pos = end;
                Some(Err(err))
            }
        }
    }
}

impl<'a> IntoIterator for &'a ZipList {
    type Item = Result<ZipValue<'a>, DecodeError>;
    type IntoIter = Values<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip_encoding::Encoding;

    fn values(zl: &ZipList) -> Vec<Vec<u8>> {
        zl.iter().map(|v| v.unwrap().to_vec()).collect()
    }

    fn from_tail(items: &[&[u8]]) -> ZipList {
        let mut zl = ZipList::new_in(&Allocator::isolated());
        for it in items {
            zl.push(it, End::Tail).unwrap();
        }
        zl
    }

    fn assert_valid(zl: &ZipList) {
        validate(zl.as_bytes()).unwrap();
    }

    #[test]
    fn empty_list_layout() {
        let zl = ZipList::new_in(&Allocator::isolated());
        assert_eq!(zl.as_bytes(), &[11, 0, 0, 0, 10, 0, 0, 0, 0, 0, 0xFF]);
        assert!(zl.is_empty());
        assert_eq!(zl.len(), 0);
        assert_eq!(zl.index(0).unwrap(), None);
        assert_eq!(zl.index(-1).unwrap(), None);
        assert_eq!(zl.prev(Position(10)).unwrap(), None);
    }

    #[test]
    fn push_head_and_tail() {
        let mut zl = ZipList::new_in(&Allocator::isolated());
        zl.push(b"foo", End::Tail).unwrap();
        zl.push(b"quux", End::Tail).unwrap();
        zl.push(b"hello", End::Head).unwrap();
        assert_eq!(zl.len(), 3);
        assert_eq!(values(&zl), [&b"hello"[..], b"foo", b"quux"]);
        let second = zl.index(1).unwrap().unwrap();
        assert_eq!(zl.get(second).unwrap(), Some(ZipValue::Bytes(b"foo")));
        assert_valid(&zl);
    }

    #[test]
    fn integers_take_narrowest_class() {
        let mut zl = ZipList::new_in(&Allocator::isolated());
        let p = zl.push(b"128000", End::Tail).unwrap();
        assert_eq!(zl.get(p).unwrap(), Some(ZipValue::Int(128000)));
        assert_eq!(zl.entry(p).unwrap().unwrap().encoding, Encoding::Int24);

        let p = zl.push(b"5", End::Tail).unwrap();
        let e = zl.entry(p).unwrap().unwrap();
        assert_eq!(e.encoding, Encoding::Imm(5));
        assert_eq!(e.size(), 2);

        // Not canonical, so kept verbatim.
        let p = zl.push(b"007", End::Tail).unwrap();
        assert_eq!(zl.get(p).unwrap(), Some(ZipValue::Bytes(b"007")));
        assert_valid(&zl);
    }

    /// Invariant: growing one entry past 253 bytes widens every following
    /// predecessor field in turn, and shrinking it narrows them again so the
    /// bytes match a list built directly.
    #[test]
    fn cascade_grows_and_shrinks() {
        let filler = vec![b'a'; 250];
        let items: Vec<&[u8]> = vec![filler.as_slice(); 5];
        let mut zl = from_tail(&items);
        let baseline = zl.as_bytes().to_vec();
        let mut p = zl.index(0).unwrap();
        while let Some(pos) = p {
            assert_eq!(zl.entry(pos).unwrap().unwrap().size(), 253);
            p = zl.next(pos).unwrap();
        }

        let big = vec![b'b'; 300];
        zl.push(&big, End::Head).unwrap();
        assert_valid(&zl);
        for i in 1..6 {
            let pos = zl.index(i).unwrap().unwrap();
            assert_eq!(zl.entry(pos).unwrap().unwrap().prev_len_size, 5, "entry {i}");
        }
        assert_eq!(zl.blob_len(), baseline.len() + 303 + 5 * 4);

        let head = zl.index(0).unwrap().unwrap();
        zl.delete(head).unwrap();
        assert_valid(&zl);
        assert_eq!(zl.as_bytes(), &baseline[..]);
    }

    #[test]
    fn insert_before_shifts_and_tracks_tail() {
        let mut zl = from_tail(&[b"a", b"c"]);
        let c = zl.index(1).unwrap().unwrap();
        let b = zl.insert(c, b"b").unwrap();
        assert_eq!(b, c);
        assert_eq!(values(&zl), [&b"a"[..], b"b", b"c"]);
        assert_valid(&zl);
        assert_eq!(zl, from_tail(&[b"a", b"b", b"c"]));
    }

    #[test]
    fn traversal_both_ways() {
        let zl = from_tail(&[b"one", b"2", b"three"]);
        let last = zl.index(-1).unwrap().unwrap();
        assert_eq!(zl.get(last).unwrap(), Some(ZipValue::Bytes(b"three")));
        let first = zl.index(-3).unwrap().unwrap();
        assert_eq!(Some(first), zl.index(0).unwrap());
        assert_eq!(zl.index(-4).unwrap(), None);
        assert_eq!(zl.index(3).unwrap(), None);

        let mid = zl.next(first).unwrap().unwrap();
        assert_eq!(zl.get(mid).unwrap(), Some(ZipValue::Int(2)));
        assert_eq!(zl.prev(mid).unwrap(), Some(first));
        assert_eq!(zl.prev(first).unwrap(), None);
        assert_eq!(zl.next(last).unwrap(), None);

        let end = Position(zl.blob_len() - 1);
        assert_eq!(zl.prev(end).unwrap(), Some(last));
        assert_eq!(zl.next(end).unwrap(), None);
        assert_eq!(zl.get(end).unwrap(), None);
    }

    #[test]
    fn delete_range_from_middle_and_to_end() {
        let mut zl = from_tail(&[b"a", b"b", b"c", b"d", b"e"]);
        let b = zl.index(1).unwrap().unwrap();
        let after = zl.delete_range(b, 2).unwrap();
        assert_eq!(zl.get(after).unwrap(), Some(ZipValue::Bytes(b"d")));
        assert_eq!(values(&zl), [&b"a"[..], b"d", b"e"]);
        assert_valid(&zl);

        let d = zl.index(1).unwrap().unwrap();
        let after = zl.delete_range(d, 10).unwrap();
        assert_eq!(zl.get(after).unwrap(), None);
        assert_eq!(values(&zl), [&b"a"[..]]);
        assert_valid(&zl);

        let a = zl.index(0).unwrap().unwrap();
        zl.delete(a).unwrap();
        assert_eq!(zl, ZipList::new_in(&Allocator::isolated()));
    }

    #[test]
    fn compare_respects_encoding() {
        let zl = from_tail(&[b"hello", b"1024"]);
        let s = zl.index(0).unwrap().unwrap();
        let n = zl.index(1).unwrap().unwrap();
        assert!(zl.compare(s, b"hello").unwrap());
        assert!(!zl.compare(s, b"hell").unwrap());
        assert!(zl.compare(n, b"1024").unwrap());
        assert!(!zl.compare(n, b"01024").unwrap());
        assert!(!zl.compare(Position(zl.blob_len() - 1), b"x").unwrap());
    }

    #[test]
    fn find_with_skip() {
        let zl = from_tail(&[b"k1", b"1", b"k2", b"2", b"k3", b"1"]);
        let head = zl.index(0).unwrap().unwrap();
        // Keys only: every other entry.
        assert_eq!(zl.find(head, b"k3", 1).unwrap(), zl.index(4).unwrap());
        assert_eq!(zl.find(head, b"2", 1).unwrap(), None);
        // Values only: start at the first value.
        let v = zl.index(1).unwrap().unwrap();
        assert_eq!(zl.find(v, b"2", 1).unwrap(), zl.index(3).unwrap());
        assert_eq!(zl.find(head, b"1", 0).unwrap(), zl.index(1).unwrap());
        assert_eq!(zl.find(head, b"missing", 0).unwrap(), None);
    }

    #[test]
    fn replace_in_place() {
        let mut zl = from_tail(&[b"a", b"b", b"c"]);
        let b = zl.index(1).unwrap().unwrap();
        zl.replace(b, b"99999").unwrap();
        assert_eq!(values(&zl), [&b"a"[..], b"99999", b"c"]);
        assert_eq!(zl, from_tail(&[b"a", b"99999", b"c"]));
        let end = Position(zl.blob_len() - 1);
        assert!(zl.replace(end, b"x").is_err());
    }

    #[test]
    fn long_strings_round_trip() {
        let mid = vec![b'm'; 1000];
        let long = vec![b'l'; 20_000];
        let zl = from_tail(&[&mid, &long, b"tail"]);
        assert_eq!(values(&zl), [mid.clone(), long.clone(), b"tail".to_vec()]);
        let e = zl.entry(zl.index(1).unwrap().unwrap()).unwrap().unwrap();
        assert_eq!(e.encoding, Encoding::Str32);
        assert_eq!(e.prev_len_size, 5);
        assert_valid(&zl);
    }

    /// Invariant: the stored count stops at 65535 and `len` falls back to a
    /// walk from then on.
    #[test]
    fn count_saturates() {
        let n = COUNT_SATURATED as usize + 1;
        let mut zl = ZipList::new_in(&Allocator::isolated());
        for _ in 0..n {
            zl.push(b"1", End::Tail).unwrap();
        }
        assert_eq!(zl.header().count, COUNT_SATURATED);
        assert_eq!(zl.len(), n);
        let head = zl.index(0).unwrap().unwrap();
        // 65535 entries left: still saturated.
        zl.delete(head).unwrap();
        assert_eq!(zl.header().count, COUNT_SATURATED);
        assert_eq!(zl.len(), n - 1);
        // One fewer and the exact count is stored again.
        zl.delete(head).unwrap();
        assert_eq!(zl.header().count as usize, n - 2);
        assert_eq!(zl.len(), n - 2);
        assert_valid(&zl);
        assert_eq!(zl.as_bytes(), from_tail(&vec![b"1".as_slice(); n - 2]).as_bytes());
    }

    #[test]
    fn forged_positions_fail_closed() {
        let zl = from_tail(&[b"hello"]);
        assert_eq!(
            zl.get(Position(3)),
            Err(DecodeError::OutOfBounds { offset: 3 })
        );
        assert_eq!(
            zl.next(Position(500)),
            Err(DecodeError::OutOfBounds { offset: 500 })
        );
        // Offset 12 is inside "hello": 'e' = 0x65 reads as a 14-bit string
        // header whose length runs past the buffer.
        assert!(zl.get(Position(12)).is_err());
    }

    #[test]
    fn mutations_reject_offsets_inside_entries() {
        let mut zl = from_tail(&[b"\0\0", b"xy"]);
        let head = zl.index(0).unwrap().unwrap();
        zl.replace(head, b"\0\0\0\0").unwrap();
        let before = zl.as_bytes().to_vec();

        // Offset 12 is the payload of the head entry. Its zero bytes decode
        // as an empty string entry, so only a boundary walk can tell.
        let inside = Position(12);
        assert!(zl.entry(inside).is_ok());
        assert_eq!(
            zl.insert(inside, b"zz"),
            Err(DecodeError::NotAnEntry { offset: 12 })
        );
        assert_eq!(
            zl.delete(inside),
            Err(DecodeError::NotAnEntry { offset: 12 })
        );
        assert_eq!(
            zl.replace(inside, b"zz"),
            Err(DecodeError::NotAnEntry { offset: 12 })
        );
        assert_eq!(zl.as_bytes(), &before[..]);
        assert_valid(&zl);

        // Real boundaries still work, including the end marker.
        let second = zl.index(1).unwrap().unwrap();
        zl.insert(second, b"zz").unwrap();
        zl.insert(Position(zl.blob_len() - 1), b"end").unwrap();
        assert_valid(&zl);
        let values: Vec<Vec<u8>> = zl.iter().map(|v| v.unwrap().to_vec()).collect();
        let want: [&[u8]; 4] = [b"\0\0\0\0", b"zz", b"xy", b"end"];
        assert_eq!(values, want);
    }

    #[test]
    fn from_bytes_validates() {
        let good = from_tail(&[b"a", b"bb"]).into_bytes();
        assert!(ZipList::from_bytes_in(good.clone(), &Allocator::isolated()).is_ok());

        assert_eq!(
            ZipList::from_bytes(good[..5].to_vec()),
            Err(DecodeError::Truncated { len: 5 })
        );

        let mut bad = good.clone();
        bad.push(0);
        assert!(matches!(
            ZipList::from_bytes(bad),
            Err(DecodeError::LengthMismatch { .. })
        ));

        let mut bad = good.clone();
        let last = bad.len() - 1;
        bad[last] = 0;
        assert_eq!(ZipList::from_bytes(bad), Err(DecodeError::MissingEnd));

        // Second entry claims a 9-byte predecessor.
        let mut bad = good.clone();
        bad[13] = 9;
        assert!(matches!(
            ZipList::from_bytes(bad),
            Err(DecodeError::PrevLenMismatch { offset: 13, stored: 9, actual: 3 })
        ));

        let mut bad = good.clone();
        bad[4] = 10;
        assert!(matches!(
            ZipList::from_bytes(bad),
            Err(DecodeError::TailMismatch { stored: 10, actual: 13 })
        ));

        let mut bad = good;
        bad[8] = 7;
        assert!(matches!(
            ZipList::from_bytes(bad),
            Err(DecodeError::CountMismatch { stored: 7, actual: 2 })
        ));
    }

    #[test]
    fn wide_prevlen_from_other_producers_is_readable() {
        let mut bytes = vec![20, 0, 0, 0, 13, 0, 0, 0, 2, 0];
        bytes.extend_from_slice(&[0x00, 0x01, b'a']);
        bytes.extend_from_slice(&[0xFE, 3, 0, 0, 0, 0xF2]);
        bytes.push(END);
        let zl = ZipList::from_bytes_in(bytes, &Allocator::isolated()).unwrap();
        let last = zl.index(-1).unwrap().unwrap();
        assert_eq!(zl.get(last).unwrap(), Some(ZipValue::Int(1)));
        assert_eq!(zl.prev(last).unwrap(), zl.index(0).unwrap());
    }

    #[test]
    fn memory_is_accounted() {
        let alloc = Allocator::isolated();
        let mut zl = ZipList::new_in(&alloc);
        zl.push(b"hello", End::Tail).unwrap();
        assert_eq!(alloc.used_memory(), zl.blob_len());
        let copy = zl.clone();
        assert_eq!(alloc.used_memory(), 2 * zl.blob_len());
        drop(copy);
        drop(zl);
        assert_eq!(alloc.used_memory(), 0);
    }

    #[test]
    fn repr_lists_entries() {
        let zl = from_tail(&[b"hello", b"42"]);
        let r = zl.repr();
        assert!(r.starts_with("{total bytes 21} {num entries 2}"), "{r}");
        assert!(r.contains("[str]hello"));
        assert!(r.contains("[int]42"));
        assert!(r.ends_with("{end}\n"));
    }
}
