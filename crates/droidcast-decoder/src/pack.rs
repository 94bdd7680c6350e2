use bytes::{Bytes, BytesMut};
use droidcast_core::DecoderError;

/// Copy `rows` rows of `row_len` bytes out of a buffer whose rows start every
/// `stride` bytes, producing a tightly packed buffer.
pub fn pack_rows(src: &[u8], stride: usize, row_len: usize, rows: usize) -> Result<Bytes, DecoderError> {
    let mut out = BytesMut::with_capacity(row_len * rows);
    pack_rows_into(src, stride, row_len, rows, &mut out)?;
    Ok(out.freeze())
}

/// Like [`pack_rows`], writing into `out` (cleared first) so its allocation
/// can be reused once earlier frames split from it are dropped.
pub fn pack_rows_into(
    src: &[u8],
    stride: usize,
    row_len: usize,
    rows: usize,
    out: &mut BytesMut,
) -> Result<(), DecoderError> {
    if stride < row_len {
        return Err(DecoderError::DecodeFailed {
            reason: format!("row stride {stride} shorter than row length {row_len}"),
        });
    }
    let needed = match rows {
        0 => 0,
        n => stride * (n - 1) + row_len,
    };
    if src.len() < needed {
        return Err(DecoderError::DecodeFailed {
            reason: format!("picture holds {} bytes, {rows} rows need {needed}", src.len()),
        });
    }

    out.clear();
    if stride == row_len {
        out.extend_from_slice(&src[..needed]);
    } else {
        for row in 0..rows {
            let start = row * stride;
            out.extend_from_slice(&src[start..start + row_len]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_row_padding() {
        // Three rows of 4 bytes, padded to 8
        let src: Vec<u8> = (0..24).collect();
        let packed = pack_rows(&src, 8, 4, 3).unwrap();
        assert_eq!(&packed[..], [0, 1, 2, 3, 8, 9, 10, 11, 16, 17, 18, 19]);
    }

    #[test]
    fn last_row_may_omit_padding() {
        let src: Vec<u8> = (0..20).collect();
        let packed = pack_rows(&src, 8, 4, 3).unwrap();
        assert_eq!(packed.len(), 12);
        assert_eq!(&packed[8..], [16, 17, 18, 19]);
    }

    #[test]
    fn tight_buffer_is_copied_whole() {
        let src = vec![7u8; 16];
        let mut out = BytesMut::from(&[1u8, 2, 3][..]);
        pack_rows_into(&src, 8, 8, 2, &mut out).unwrap();
        assert_eq!(&out[..], &src[..]);
    }

    #[test]
    fn short_source_is_an_error() {
        let err = pack_rows(&[0u8; 10], 8, 4, 3).unwrap_err();
        assert!(matches!(err, DecoderError::DecodeFailed { .. }));
        assert!(pack_rows(&[0u8; 64], 2, 4, 3).is_err());
    }
}
