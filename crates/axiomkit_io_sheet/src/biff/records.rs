//! BIFF8 record ids, framing and primitive field codecs.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Result, SheetError};

pub(crate) const RECORD_FORMULA: u16 = 0x0006;
pub(crate) const RECORD_EOF: u16 = 0x000A;
pub(crate) const RECORD_CONTINUE: u16 = 0x003C;
pub(crate) const RECORD_WINDOW1: u16 = 0x003D;
pub(crate) const RECORD_CODEPAGE: u16 = 0x0042;
pub(crate) const RECORD_FONT: u16 = 0x0031;
pub(crate) const RECORD_COLINFO: u16 = 0x007D;
pub(crate) const RECORD_BOUNDSHEET: u16 = 0x0085;
pub(crate) const RECORD_PALETTE: u16 = 0x0092;
pub(crate) const RECORD_MULRK: u16 = 0x00BD;
pub(crate) const RECORD_MULBLANK: u16 = 0x00BE;
pub(crate) const RECORD_XF: u16 = 0x00E0;
pub(crate) const RECORD_MERGEDCELLS: u16 = 0x00E5;
pub(crate) const RECORD_SST: u16 = 0x00FC;
pub(crate) const RECORD_LABELSST: u16 = 0x00FD;
pub(crate) const RECORD_DIMENSIONS: u16 = 0x0200;
pub(crate) const RECORD_BLANK: u16 = 0x0201;
pub(crate) const RECORD_NUMBER: u16 = 0x0203;
pub(crate) const RECORD_LABEL: u16 = 0x0204;
pub(crate) const RECORD_BOOLERR: u16 = 0x0205;
pub(crate) const RECORD_STRING: u16 = 0x0207;
pub(crate) const RECORD_WINDOW2: u16 = 0x023E;
pub(crate) const RECORD_RK: u16 = 0x027E;
pub(crate) const RECORD_STYLE: u16 = 0x0293;
pub(crate) const RECORD_FORMAT: u16 = 0x041E;
pub(crate) const RECORD_BOF: u16 = 0x0809;
/// BOF id used by BIFF5 and earlier streams.
pub(crate) const RECORD_BOF_BIFF5: u16 = 0x0009;

pub(crate) const BOF_VERSION_BIFF8: u16 = 0x0600;
pub(crate) const BOF_DT_WORKBOOK_GLOBALS: u16 = 0x0005;
pub(crate) const BOF_DT_WORKSHEET: u16 = 0x0010;

/// Largest record payload a BIFF8 writer may emit.
pub(crate) const N_LEN_RECORD_DATA_MAX: usize = 8224;

/// Option flag of XLUnicodeString: characters are UTF-16LE.
pub(crate) const STR_FLAG_HIGH_BYTE: u8 = 0x01;
pub(crate) const STR_FLAG_EXT: u8 = 0x04;
pub(crate) const STR_FLAG_RICH_TEXT: u8 = 0x08;

////////////////////////////////////////////////////////////////////////////////
// #region Writing

/// Append one record (header + payload) to `out`.
pub(crate) fn push_record(out: &mut Vec<u8>, record_id: u16, data: &[u8]) -> Result<()> {
    let n_len = u16::try_from(data.len())
        .ok()
        .filter(|n_len| usize::from(*n_len) <= N_LEN_RECORD_DATA_MAX)
        .ok_or_else(|| {
            SheetError::codec(format!(
                "BIFF record 0x{record_id:04X} payload too large: {} bytes",
                data.len()
            ))
        })?;
    out.extend_from_slice(&record_id.to_le_bytes());
    out.extend_from_slice(&n_len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// BOF payload for a workbook-globals or worksheet substream.
pub(crate) fn encode_bof(dt: u16) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..2].copy_from_slice(&BOF_VERSION_BIFF8.to_le_bytes());
    out[2..4].copy_from_slice(&dt.to_le_bytes());
    out[4..6].copy_from_slice(&0x0DBBu16.to_le_bytes()); // build
    out[6..8].copy_from_slice(&0x07CCu16.to_le_bytes()); // year
    out
}

/// ShortXLUnicodeString: `[cch: u8][flags][UTF-16LE chars]`.
pub(crate) fn write_short_unicode_string(out: &mut Vec<u8>, text: &str) -> Result<()> {
    let l_units: Vec<u16> = text.encode_utf16().collect();
    let n_cch = u8::try_from(l_units.len())
        .map_err(|_| SheetError::codec(format!("BIFF short string too long: {text:?}")))?;
    out.push(n_cch);
    out.push(STR_FLAG_HIGH_BYTE);
    for unit in l_units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(())
}

/// XLUnicodeString: `[cch: u16][flags][UTF-16LE chars]`.
pub(crate) fn write_unicode_string(out: &mut Vec<u8>, text: &str) -> Result<()> {
    let l_units: Vec<u16> = text.encode_utf16().collect();
    let n_cch = u16::try_from(l_units.len())
        .map_err(|_| SheetError::codec("BIFF string exceeds 65535 characters."))?;
    out.extend_from_slice(&n_cch.to_le_bytes());
    out.push(STR_FLAG_HIGH_BYTE);
    for unit in l_units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Reading

/// One physical record of a BIFF stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BiffRecord {
    /// Record id.
    pub record_id: u16,
    /// Stream offset of the record header.
    pub offset: u64,
    /// Payload bytes.
    pub data: Vec<u8>,
}

/// Pull-style reader of physical records.
pub(crate) struct BiffRecordReader<R> {
    reader: R,
    n_offset: u64,
}

impl<R: Read> BiffRecordReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            n_offset: 0,
        }
    }

    /// Next record, `None` at a clean end of stream.
    pub(crate) fn next_record(&mut self) -> Result<Option<BiffRecord>> {
        let mut v_header = [0u8; 4];
        let n_read = read_fully(&mut self.reader, &mut v_header)?;
        if n_read == 0 {
            return Ok(None);
        }
        if n_read < v_header.len() {
            return Err(SheetError::codec(format!(
                "truncated BIFF record header at offset {}",
                self.n_offset
            )));
        }
        let record_id = u16::from_le_bytes([v_header[0], v_header[1]]);
        let n_len = u16::from_le_bytes([v_header[2], v_header[3]]) as usize;
        let mut data = vec![0u8; n_len];
        if read_fully(&mut self.reader, &mut data)? < n_len {
            return Err(SheetError::codec(format!(
                "truncated BIFF record 0x{record_id:04X} at offset {}",
                self.n_offset
            )));
        }
        let record = BiffRecord {
            record_id,
            offset: self.n_offset,
            data,
        };
        self.n_offset += 4 + n_len as u64;
        Ok(Some(record))
    }
}

impl<R: Read + Seek> BiffRecordReader<R> {
    /// Reposition at an absolute stream offset (BOUNDSHEET `lbPlyPos`).
    pub(crate) fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.n_offset = offset;
        Ok(())
    }
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut n_total = 0;
    while n_total < buf.len() {
        match reader.read(&mut buf[n_total..]) {
            Ok(0) => break,
            Ok(n) => n_total += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(n_total)
}

/// Bounds-checked little-endian field access over one record payload.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    n_pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, n_pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.n_pos)
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let n_end = self
            .n_pos
            .checked_add(n)
            .filter(|n_end| *n_end <= self.data.len())
            .ok_or_else(|| SheetError::codec("unexpected end of BIFF record"))?;
        let data: &'a [u8] = self.data;
        let v_slice = &data[self.n_pos..n_end];
        self.n_pos = n_end;
        Ok(v_slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        let v = self.take(2)?;
        Ok(u16::from_le_bytes([v[0], v[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let v = self.take(4)?;
        Ok(u32::from_le_bytes([v[0], v[1], v[2], v[3]]))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        let v = self.take(8)?;
        let mut v_arr = [0u8; 8];
        v_arr.copy_from_slice(v);
        Ok(f64::from_le_bytes(v_arr))
    }

    /// Read `n_cch` characters in the compressed or UTF-16 form.
    pub(crate) fn read_chars(&mut self, n_cch: usize, if_high_byte: bool) -> Result<String> {
        if if_high_byte {
            let v = self.take(n_cch * 2)?;
            let l_units: Vec<u16> = v
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            Ok(String::from_utf16_lossy(&l_units))
        } else {
            Ok(self.take(n_cch)?.iter().map(|b| char::from(*b)).collect())
        }
    }

    /// XLUnicodeString with a 16-bit length prefix.
    pub(crate) fn read_unicode_string(&mut self) -> Result<String> {
        let n_cch = self.read_u16()? as usize;
        self.read_flagged_chars(n_cch)
    }

    /// ShortXLUnicodeString with an 8-bit length prefix.
    pub(crate) fn read_short_unicode_string(&mut self) -> Result<String> {
        let n_cch = self.read_u8()? as usize;
        self.read_flagged_chars(n_cch)
    }

    fn read_flagged_chars(&mut self, n_cch: usize) -> Result<String> {
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
        let c_text = self.read_chars(n_cch, flags & STR_FLAG_HIGH_BYTE != 0)?;
        self.take((n_runs * 4).min(self.remaining()))?;
        self.take(n_ext.min(self.remaining()))?;
        Ok(c_text)
    }
}

/// Decode an RK-packed number.
pub(crate) fn decode_rk(rk: u32) -> f64 {
    let if_x100 = rk & 0x01 != 0;
    let if_int = rk & 0x02 != 0;
    let val = if if_int {
        f64::from((rk as i32) >> 2)
    } else {
        f64::from_bits(u64::from(rk & 0xFFFF_FFFC) << 32)
    };
    if if_x100 { val / 100.0 } else { val }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip_through_reader() {
        let mut v_stream = Vec::new();
        push_record(&mut v_stream, RECORD_BOF, &encode_bof(BOF_DT_WORKSHEET)).expect("bof");
        push_record(&mut v_stream, RECORD_EOF, &[]).expect("eof");

        let mut reader = BiffRecordReader::new(std::io::Cursor::new(v_stream));
        let bof = reader.next_record().expect("read").expect("bof");
        assert_eq!(bof.record_id, RECORD_BOF);
        assert_eq!(bof.data.len(), 16);
        let eof = reader.next_record().expect("read").expect("eof");
        assert_eq!((eof.record_id, eof.offset), (RECORD_EOF, 20));
        assert!(reader.next_record().expect("read").is_none());
    }

    #[test]
    fn truncated_record_is_a_codec_error() {
        let v_stream = vec![0x03, 0x02, 0x0E, 0x00, 0x01];
        let mut reader = BiffRecordReader::new(std::io::Cursor::new(v_stream));
        assert!(matches!(reader.next_record(), Err(SheetError::Codec { .. })));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut out = Vec::new();
        let v_data = vec![0u8; N_LEN_RECORD_DATA_MAX + 1];
        assert!(push_record(&mut out, RECORD_SST, &v_data).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn strings_decode_in_both_widths() {
        let mut out = Vec::new();
        write_unicode_string(&mut out, "卡密 ok").expect("write");
        assert_eq!(
            ByteCursor::new(&out).read_unicode_string().expect("read"),
            "卡密 ok"
        );

        // Compressed form as produced by other writers.
        let v_compressed = [3u8, 0, b'a', b'b', b'c'];
        assert_eq!(
            ByteCursor::new(&v_compressed)
                .read_short_unicode_string()
                .expect("read"),
            "abc"
        );
    }

    #[test]
    fn rk_values_decode() {
        // Integer 20.
        assert_eq!(decode_rk((20 << 2) | 0x02), 20.0);
        // Integer 1234 scaled by 1/100.
        assert_eq!(decode_rk((1234 << 2) | 0x03), 12.34);
        // IEEE 1.0 keeps only the upper 30 bits.
        let rk = (1.0f64.to_bits() >> 32) as u32;
        assert_eq!(decode_rk(rk), 1.0);
        // Negative integer.
        assert_eq!(decode_rk(((-5i32 << 2) as u32) | 0x02), -5.0);
    }
}
