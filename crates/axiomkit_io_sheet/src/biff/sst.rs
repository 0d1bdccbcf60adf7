//! Shared string table (`SST`) encoding and decoding.
//!
//! The table is one logical record split into `SST` + `CONTINUE` fragments.
//! A string whose characters cross a fragment boundary resumes after a fresh
//! option-flags byte; string headers and surrogate pairs are never split.

use crate::error::{Result, SheetError};

use super::records::{
    N_LEN_RECORD_DATA_MAX, RECORD_CONTINUE, RECORD_SST, STR_FLAG_EXT, STR_FLAG_HIGH_BYTE,
    STR_FLAG_RICH_TEXT, push_record,
};

////////////////////////////////////////////////////////////////////////////////
// #region Encoding

/// Serialize the table into `out` as `SST` followed by `CONTINUE` records.
pub(crate) fn encode_sst(out: &mut Vec<u8>, strings: &[String], n_refs_total: u32) -> Result<()> {
    let n_unique = u32::try_from(strings.len())
        .map_err(|_| SheetError::codec("shared string table too large"))?;

    let mut l_fragments: Vec<Vec<u8>> = Vec::new();
    let mut v_current: Vec<u8> = Vec::with_capacity(N_LEN_RECORD_DATA_MAX);
    v_current.extend_from_slice(&n_refs_total.to_le_bytes());
    v_current.extend_from_slice(&n_unique.to_le_bytes());

    for c_text in strings {
        let l_units: Vec<u16> = c_text.encode_utf16().collect();
        let n_cch = u16::try_from(l_units.len())
            .map_err(|_| SheetError::codec("shared string exceeds 65535 characters"))?;

        // Header plus the first character must land in the same fragment.
        let n_len_head = 3 + match l_units.first() {
            None => 0,
            Some(unit) if is_high_surrogate(*unit) => 4,
            Some(_) => 2,
        };
        if v_current.len() + n_len_head > N_LEN_RECORD_DATA_MAX {
            l_fragments.push(std::mem::take(&mut v_current));
        }
        v_current.extend_from_slice(&n_cch.to_le_bytes());
        v_current.push(STR_FLAG_HIGH_BYTE);

        let mut l_rest: &[u16] = &l_units;
        while !l_rest.is_empty() {
            let n_units_room = (N_LEN_RECORD_DATA_MAX - v_current.len()) / 2;
            let mut n_take = n_units_room.min(l_rest.len());
            if n_take > 0 && n_take < l_rest.len() && is_high_surrogate(l_rest[n_take - 1]) {
                n_take -= 1;
            }
            if n_take == 0 {
                l_fragments.push(std::mem::take(&mut v_current));
                v_current.push(STR_FLAG_HIGH_BYTE);
                continue;
            }
            let (l_head, l_tail) = l_rest.split_at(n_take);
            for unit in l_head {
                v_current.extend_from_slice(&unit.to_le_bytes());
            }
            l_rest = l_tail;
        }
    }
    l_fragments.push(v_current);

    for (n_idx, v_fragment) in l_fragments.iter().enumerate() {
        let record_id = if n_idx == 0 { RECORD_SST } else { RECORD_CONTINUE };
        push_record(out, record_id, v_fragment)?;
    }
    Ok(())
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Decoding

struct FragmentCursor<'a> {
    fragments: &'a [Vec<u8>],
    n_idx_frag: usize,
    n_pos: usize,
}

impl<'a> FragmentCursor<'a> {
    fn new(fragments: &'a [Vec<u8>]) -> Self {
        Self {
            fragments,
            n_idx_frag: 0,
            n_pos: 0,
        }
    }

    fn remaining_in_fragment(&self) -> usize {
        self.fragments
            .get(self.n_idx_frag)
            .map(|frag| frag.len().saturating_sub(self.n_pos))
            .unwrap_or(0)
    }

    fn advance_fragment(&mut self) -> Result<()> {
        self.n_idx_frag += 1;
        self.n_pos = 0;
        if self.n_idx_frag >= self.fragments.len() {
            return Err(SheetError::codec("shared string table ends mid-string"));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        while self.remaining_in_fragment() == 0 {
            self.advance_fragment()?;
        }
        let n_byte = self.fragments[self.n_idx_frag][self.n_pos];
        self.n_pos += 1;
        Ok(n_byte)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes([self.read_u8()?, self.read_u8()?]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes([
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
        ]))
    }

    fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            if self.remaining_in_fragment() == 0 {
                self.advance_fragment()?;
                continue;
            }
            let n_step = n.min(self.remaining_in_fragment());
            self.n_pos += n_step;
            n -= n_step;
        }
        Ok(())
    }

    /// XLUnicodeRichExtendedString whose characters may span fragments.
    fn read_rich_extended_string(&mut self) -> Result<String> {
        let n_cch = self.read_u16()? as usize;
        let flags = self.read_u8()?;
        let n_runs = if flags & STR_FLAG_RICH_TEXT != 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let n_ext = if flags & STR_FLAG_EXT != 0 {
            self.read_u32()? as usize
        } else {
            0
        };

        let mut if_high_byte = flags & STR_FLAG_HIGH_BYTE != 0;
        let mut l_units: Vec<u16> = Vec::with_capacity(n_cch);
        while l_units.len() < n_cch {
            if self.remaining_in_fragment() == 0 {
                self.advance_fragment()?;
                // Each continuation restates the character width.
                if_high_byte = self.read_u8()? & STR_FLAG_HIGH_BYTE != 0;
                continue;
            }
            if if_high_byte {
                l_units.push(self.read_u16()?);
            } else {
                l_units.push(u16::from(self.read_u8()?));
            }
        }

        self.skip(n_runs * 4)?;
        self.skip(n_ext)?;
        Ok(String::from_utf16_lossy(&l_units))
    }
}

/// Decode the unique strings of an `SST` record and its `CONTINUE` fragments.
pub(crate) fn decode_sst(fragments: &[Vec<u8>]) -> Result<Vec<String>> {
    let mut cursor = FragmentCursor::new(fragments);
    let _n_refs_total = cursor.read_u32()?;
    let n_unique = cursor.read_u32()? as usize;

    let mut l_strings = Vec::with_capacity(n_unique.min(65_536));
    for _ in 0..n_unique {
        l_strings.push(cursor.read_rich_extended_string()?);
    }
    Ok(l_strings)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biff::records::BiffRecordReader;

    fn derive_fragments(v_stream: Vec<u8>) -> Vec<(u16, Vec<u8>)> {
        let mut reader = BiffRecordReader::new(std::io::Cursor::new(v_stream));
        let mut l_records = Vec::new();
        while let Some(record) = reader.next_record().expect("read") {
            l_records.push((record.record_id, record.data));
        }
        l_records
    }

    #[test]
    fn small_table_fits_one_record() {
        let l_strings = vec!["A".to_string(), "卡密".to_string(), String::new()];
        let mut out = Vec::new();
        encode_sst(&mut out, &l_strings, 5).expect("encode");

        let l_records = derive_fragments(out);
        assert_eq!(l_records.len(), 1);
        assert_eq!(l_records[0].0, RECORD_SST);
        let l_data: Vec<Vec<u8>> = l_records.into_iter().map(|(_, data)| data).collect();
        assert_eq!(decode_sst(&l_data).expect("decode"), l_strings);
    }

    #[test]
    fn long_strings_continue_across_records() {
        let l_strings: Vec<String> = (0..6)
            .map(|n| format!("{n}-{}", "x".repeat(3_000)))
            .collect();
        let mut out = Vec::new();
        encode_sst(&mut out, &l_strings, 6).expect("encode");

        let l_records = derive_fragments(out);
        assert!(l_records.len() > 1);
        assert!(l_records[1..].iter().all(|(id, _)| *id == RECORD_CONTINUE));
        assert!(
            l_records
                .iter()
                .all(|(_, data)| data.len() <= N_LEN_RECORD_DATA_MAX)
        );
        let l_data: Vec<Vec<u8>> = l_records.into_iter().map(|(_, data)| data).collect();
        assert_eq!(decode_sst(&l_data).expect("decode"), l_strings);
    }

    #[test]
    fn surrogate_pairs_stay_within_one_fragment() {
        let l_strings = vec![
            format!("a{}", "😀".repeat(3_000)),
            format!("😀{}", "b".repeat(8_000)),
            "😀".repeat(5_000),
        ];
        let mut out = Vec::new();
        encode_sst(&mut out, &l_strings, 3).expect("encode");

        let l_records = derive_fragments(out);
        assert!(l_records.len() > 2);
        for (_, data) in &l_records[1..] {
            assert_eq!(data[0], STR_FLAG_HIGH_BYTE);
            let n_unit_first = u16::from_le_bytes([data[1], data[2]]);
            assert!(
                !(0xDC00..=0xDFFF).contains(&n_unit_first),
                "continuation opens with a low surrogate"
            );
        }
        let l_data: Vec<Vec<u8>> = l_records.into_iter().map(|(_, data)| data).collect();
        assert_eq!(decode_sst(&l_data).expect("decode"), l_strings);
    }

    #[test]
    fn compressed_continuation_from_other_writers_decodes() {
        // "abcd" split after "ab"; the continuation switches to UTF-16.
        let v_first = {
            let mut v = Vec::new();
            v.extend_from_slice(&1u32.to_le_bytes());
            v.extend_from_slice(&1u32.to_le_bytes());
            v.extend_from_slice(&4u16.to_le_bytes());
            v.push(0);
            v.extend_from_slice(b"ab");
            v
        };
        let v_second = vec![STR_FLAG_HIGH_BYTE, b'c', 0, b'd', 0];
        assert_eq!(
            decode_sst(&[v_first, v_second]).expect("decode"),
            vec!["abcd".to_string()]
        );
    }

    #[test]
    fn truncated_table_is_rejected() {
        let mut v = Vec::new();
        v.extend_from_slice(&1u32.to_le_bytes());
        v.extend_from_slice(&2u32.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes());
        v.push(0);
        v.push(b'a');
        assert!(decode_sst(&[v]).is_err());
    }
}
