// Reversible text compression for the synchronous cache tier.
// LZ4 block compression with a base64 text form behind a short header.

use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Strings with at least this many characters are compressed.
pub const COMPRESSION_THRESHOLD: usize = 10_000;

/// Marks a compressed payload so plain text is never mistaken for one.
const HEADER: &str = "\u{1}lz4:";

/// Upper bound on the LZ4 block expansion ratio.
const MAX_RATIO: usize = 255;

/// Compress `input` when it reaches [`COMPRESSION_THRESHOLD`] characters.
pub fn compress(input: &str) -> String {
    compress_with_threshold(input, COMPRESSION_THRESHOLD)
}

/// Compress `input` when it has at least `threshold` characters.
///
/// Short inputs that already begin with the compression header are
/// compressed anyway, so [`decompress`] can always tell the two apart.
pub fn compress_with_threshold(input: &str, threshold: usize) -> String {
    if !input.starts_with(HEADER) && input.chars().count() < threshold {
        return input.to_string();
    }

    let packed = lz4_flex::compress_prepend_size(input.as_bytes());
    let mut out = String::with_capacity(HEADER.len() + packed.len() * 4 / 3 + 4);
    out.push_str(HEADER);
    STANDARD.encode_string(&packed, &mut out);
    out
}

/// Reverse [`compress`]. Untagged or malformed input is returned unchanged.
pub fn decompress(input: &str) -> String {
    let Some(payload) = input.strip_prefix(HEADER) else {
        return input.to_string();
    };

    unpack(payload).unwrap_or_else(|| input.to_string())
}

fn unpack(payload: &str) -> Option<String> {
    let packed = STANDARD.decode(payload).ok()?;

    // A corrupt size prefix must not drive a huge allocation.
    let prefix: [u8; 4] = packed.get(..4)?.try_into().ok()?;
    let size = u32::from_le_bytes(prefix) as usize;
    if size > packed.len().saturating_mul(MAX_RATIO) {
        return None;
    }

    let bytes = lz4_flex::decompress_size_prepended(&packed).ok()?;
    String::from_utf8(bytes).ok()
}

/// Whether `input` carries the compression header.
pub fn is_compressed(input: &str) -> bool {
    input.starts_with(HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_markup(len: usize) -> String {
        let chunk = r#"<div class="box" data-widget="github-stats"><span class="stat-value">42</span></div>"#;
        chunk.chars().cycle().take(len).collect()
    }

    #[test]
    fn test_below_threshold_is_identity() {
        let input = sample_markup(COMPRESSION_THRESHOLD - 1);
        let compressed = compress(&input);

        assert_eq!(compressed, input);
        assert_eq!(decompress(&compressed), input);
    }

    #[test]
    fn test_at_threshold_compresses_and_round_trips() {
        let input = sample_markup(COMPRESSION_THRESHOLD);
        let compressed = compress(&input);

        assert!(is_compressed(&compressed));
        assert!(compressed.len() < input.len());
        assert_eq!(decompress(&compressed), input);
    }

    #[test]
    fn test_well_above_threshold_round_trips() {
        let input = sample_markup(COMPRESSION_THRESHOLD * 7 + 13);
        assert_eq!(decompress(&compress(&input)), input);
    }

    #[test]
    fn test_non_ascii_and_astral_round_trip() {
        let input: String = "héllo wörld ✓ 🚀 日本語 "
            .chars()
            .cycle()
            .take(COMPRESSION_THRESHOLD + 500)
            .collect();
        assert_eq!(decompress(&compress(&input)), input);
    }

    #[test]
    fn test_compressed_payload_is_plain_ascii() {
        let compressed = compress(&sample_markup(COMPRESSION_THRESHOLD * 2));
        let payload = compressed.strip_prefix(HEADER).unwrap();

        assert!(payload.bytes().all(|b| b.is_ascii_graphic()));
    }

    #[test]
    fn test_decompress_plain_text_is_noop() {
        let plain = r#"{"html":"<div>hi</div>","themeId":"matrix"}"#;
        assert_eq!(decompress(plain), plain);
        assert_eq!(decompress(""), "");
    }

    #[test]
    fn test_decompress_malformed_payload_returns_input() {
        let garbage = format!("{}\u{7}\u{7}", HEADER);
        assert_eq!(decompress(&garbage), garbage);

        let truncated = {
            let full = compress(&sample_markup(COMPRESSION_THRESHOLD));
            full.chars().take(HEADER.chars().count() + 10).collect::<String>()
        };
        assert_eq!(decompress(&truncated), truncated);
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let mut packed = u32::MAX.to_le_bytes().to_vec();
        packed.extend_from_slice(b"\x10a");
        let forged = format!("{}{}", HEADER, STANDARD.encode(&packed));

        assert_eq!(decompress(&forged), forged);
    }

    #[test]
    fn test_short_input_with_header_still_round_trips() {
        let tricky = format!("{}not really compressed", HEADER);
        let compressed = compress(&tricky);

        assert_ne!(compressed, tricky);
        assert_eq!(decompress(&compressed), tricky);
    }

    #[test]
    fn test_empty_input_round_trips_when_forced() {
        let compressed = compress_with_threshold("", 0);
        assert!(is_compressed(&compressed));
        assert_eq!(decompress(&compressed), "");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_round_trip_any_string(input in "\\PC{0,400}") {
            let compressed = compress_with_threshold(&input, 0);
            prop_assert_eq!(decompress(&compressed), input);
        }

        #[test]
        fn prop_round_trip_repetitive_markup(seed in "[a-z<>/=\" ]{1,16}", repeat in 1usize..300) {
            let input = seed.repeat(repeat);
            let compressed = compress_with_threshold(&input, 0);
            prop_assert_eq!(decompress(&compressed), input);
        }

        #[test]
        fn prop_decompress_never_panics(payload in "[A-Za-z0-9+/=]{0,64}") {
            let tagged = format!("{}{}", HEADER, payload);
            let _ = decompress(&tagged);
            prop_assert_eq!(decompress(&payload), payload);
        }
    }
}
