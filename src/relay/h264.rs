//! H.264 RTP payload inspection.
//!
//! The relay never depacketizes; it only needs to recognize keyframes on
//! the forward path so keyframe solicitation can stop once one has gone
//! through.

const NAL_TYPE_MASK: u8 = 0x1F;
const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_STAP_A: u8 = 24;

/// True if an RTP payload carries keyframe material: an IDR slice or the
/// SPS/PPS parameter sets, with STAP-A aggregates inspected one level
/// deeper (header byte, two size bytes, then the first inner NAL).
pub fn is_keyframe(payload: &[u8]) -> bool {
    if payload.is_empty() {
        return false;
    }
    match payload[0] & NAL_TYPE_MASK {
        NAL_IDR | NAL_SPS | NAL_PPS => true,
        NAL_STAP_A => {
            payload.len() > 3 && matches!(payload[3] & NAL_TYPE_MASK, NAL_IDR | NAL_SPS | NAL_PPS)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_idr_sps_pps() {
        assert!(is_keyframe(&[0x65, 0x00])); // IDR (type 5)
        assert!(is_keyframe(&[0x67, 0x00])); // SPS (type 7)
        assert!(is_keyframe(&[0x68, 0x00])); // PPS (type 8)
    }

    #[test]
    fn rejects_non_key_nals() {
        assert!(!is_keyframe(&[0x61, 0x00])); // non-IDR slice (type 1)
        assert!(!is_keyframe(&[0x7c, 0x85])); // FU-A (type 28)
        assert!(!is_keyframe(&[]));
    }

    #[test]
    fn inspects_stap_a_one_level_deep() {
        // STAP-A header, 2-byte NALU size, inner SPS header.
        assert!(is_keyframe(&[0x78, 0x00, 0x04, 0x67, 0x42]));
        // Inner non-IDR slice.
        assert!(!is_keyframe(&[0x78, 0x00, 0x04, 0x61, 0x42]));
        // Truncated aggregate.
        assert!(!is_keyframe(&[0x78, 0x00, 0x04]));
    }
}
