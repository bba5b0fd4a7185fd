//! Fixed-width fingerprint with provenance tags.
//!
//! Layout (hex digit offsets):
//!
//! ```text
//!   0..40   host            tag 0, padded with ff
//!  40..80   content-type    tag a, padded with ff
//!  80..96   body length     lowercase hex, right-padded with 'x'
//!  96..136  path            tag b, padded with ff
//! 136..150  method          tag c, padded with ff
//! 150..172  body            whole body (tag 9, padded with f0) or 11 samples
//! ```
//!
//! A tag replaces the leading `0` nibble of bytes below `0x10`, so every
//! byte still takes two characters. A field longer than its segment is
//! written in full and the next padding shrinks; the result is then longer
//! than [`FINGERPRINT_LEN`].

use std::fmt::Write;

use super::{SAMPLE_THRESHOLD, ValidatedRequest, sample_positions};

pub const FINGERPRINT_LEN: usize = 172;

const HOST_END: usize = 40;
const CONTENT_TYPE_END: usize = 80;
const LENGTH_WIDTH: usize = 16;
const PATH_END: usize = 136;
const METHOD_END: usize = 150;

const FIELD_PAD: &str = "ff";
const BODY_PAD: &str = "f0";
// Not a hex digit. Historical fingerprints depend on it.
const LENGTH_FILLER: char = 'x';

const HOST_TAG: char = '0';
const CONTENT_TYPE_TAG: char = 'a';
const PATH_TAG: char = 'b';
const METHOD_TAG: char = 'c';
const SHORT_BODY_TAG: char = '9';

/// Tags of the sampled body positions, in sampling order.
const SAMPLE_TAGS: [char; 11] = ['0', '9', 'f', 'c', 'd', 'e', '2', '3', '4', '3', '2'];

fn push_tagged(out: &mut String, byte: u8, tag: char) {
    if byte < 0x10 {
        out.push(tag);
        let _ = write!(out, "{byte:x}");
    } else {
        let _ = write!(out, "{byte:02x}");
    }
}

fn push_field(out: &mut String, bytes: &[u8], tag: char) {
    for &byte in bytes {
        push_tagged(out, byte, tag);
    }
}

fn pad_to(out: &mut String, end: usize, filler: &str) {
    while out.len() < end {
        out.push_str(filler);
    }
}

fn push_length(out: &mut String, len: usize) {
    let start = out.len();
    let _ = write!(out, "{len:x}");
    while out.len() - start < LENGTH_WIDTH {
        out.push(LENGTH_FILLER);
    }
}

pub fn encode(request: &ValidatedRequest<'_>) -> String {
    let mut out = String::with_capacity(FINGERPRINT_LEN);

    push_field(&mut out, request.host.as_bytes(), HOST_TAG);
    pad_to(&mut out, HOST_END, FIELD_PAD);

    push_field(&mut out, request.content_type.as_bytes(), CONTENT_TYPE_TAG);
    pad_to(&mut out, CONTENT_TYPE_END, FIELD_PAD);

    push_length(&mut out, request.body.len());

    push_field(&mut out, request.path.as_bytes(), PATH_TAG);
    pad_to(&mut out, PATH_END, FIELD_PAD);

    push_field(&mut out, request.method.as_bytes(), METHOD_TAG);
    pad_to(&mut out, METHOD_END, FIELD_PAD);

    let body = request.body;
    if body.len() < SAMPLE_THRESHOLD {
        push_field(&mut out, body, SHORT_BODY_TAG);
        pad_to(&mut out, FINGERPRINT_LEN, BODY_PAD);
    } else {
        for (position, tag) in sample_positions(body.len()).into_iter().zip(SAMPLE_TAGS) {
            push_tagged(&mut out, body[position], tag);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::fingerprint::tests::attrs;
    use crate::fingerprint::{RequestAttributes, RequestBody};
    use bytes::Bytes;

    fn fingerprint(attrs: &RequestAttributes) -> String {
        encode(&attrs.validate().expect("valid request"))
    }

    fn with_body(body: &[u8]) -> RequestAttributes {
        let mut attrs = attrs("");
        attrs.body = Some(RequestBody::Bytes(Bytes::copy_from_slice(body)));
        attrs
    }

    #[test]
    fn known_short_body_layout() {
        let fp = fingerprint(&attrs("Frase"));

        assert_eq!(
            &fp[..40],
            "6c6f63616c686f73743a33323132ffffffffffff"
        );
        assert_eq!(
            &fp[40..80],
            "6170706c69636174696f6e2f6a736f6effffffff"
        );
        assert_eq!(&fp[80..96], "5xxxxxxxxxxxxxxx");
        assert_eq!(
            &fp[96..136],
            "2f76312f70726f6475637473ffffffffffffffff"
        );
        assert_eq!(&fp[136..150], "504f5354ffffff");
        assert_eq!(&fp[150..], "4672617365f0f0f0f0f0f0");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn sampled_body_uses_position_tags() {
        // 0x01..=0x0c: every byte is below 0x10, so every sample shows its tag.
        let body: Vec<u8> = (1..=12).collect();
        let fp = fingerprint(&with_body(&body));

        // positions 0,1,2,3,4,5,6,11,10,9,8 -> values 1,2,3,4,5,6,7,c,b,a,9
        assert_eq!(&fp[150..], "0192f3c4d5e6273c4b3a29");
        assert_eq!(&fp[80..96], "cxxxxxxxxxxxxxxx");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn low_bytes_carry_field_tags() {
        let mut attrs = with_body(&[0x00, 0x0f]);
        attrs.host = Some("\u{1}".to_string());
        attrs.content_type = Some("\u{2}".to_string());
        attrs.path = Some("\u{3}".to_string());
        attrs.method = Some("\u{4}".to_string());
        let fp = fingerprint(&attrs);

        assert!(fp.starts_with("01ff"));
        assert!(fp[40..].starts_with("a2ff"));
        assert!(fp[96..].starts_with("b3ff"));
        assert!(fp[136..].starts_with("c4ff"));
        assert!(fp[150..].starts_with("909ff0"));
    }

    #[test]
    fn identical_requests_give_identical_fingerprints() {
        let attrs = attrs("Frase de teste um tanto quanto longa de certa forma");
        let first = fingerprint(&attrs);
        for _ in 0..2500 {
            assert_eq!(fingerprint(&attrs), first);
        }
    }

    #[test]
    fn growing_bodies_never_collide() {
        let mut message = String::from("Frase de teste um tanto quanto longa de certa forma");
        let mut seen = HashSet::new();
        for _ in 0..20_000 {
            assert!(seen.insert(fingerprint(&attrs(&message))));
            message.push('a');
        }
        assert_eq!(seen.len(), 20_000);
    }

    #[test]
    fn length_is_fixed_for_fields_within_capacity() {
        let mut message = String::from("Frase");
        for _ in 0..20_000 {
            assert_eq!(fingerprint(&attrs(&message)).len(), FINGERPRINT_LEN);
            message.push('a');
        }
    }

    #[test]
    fn any_field_change_changes_fingerprint() {
        let base = attrs("Texto para teste!");
        let reference = fingerprint(&base);

        let mut other = base.clone();
        other.host = Some("localhost:3213".to_string());
        assert_ne!(fingerprint(&other), reference);

        let mut other = base.clone();
        other.content_type = Some("text/plain".to_string());
        assert_ne!(fingerprint(&other), reference);

        let mut other = base.clone();
        other.path = Some("/v2/products".to_string());
        assert_ne!(fingerprint(&other), reference);

        let mut other = base.clone();
        other.method = Some("PUT".to_string());
        assert_ne!(fingerprint(&other), reference);

        assert_ne!(fingerprint(&attrs("Texto para teste?")), reference);
    }

    #[test]
    fn overflowing_field_extends_fingerprint() {
        let mut attrs = attrs("Frase");
        attrs.content_type = Some("application/json; charset=utf-8".to_string());
        let fp = fingerprint(&attrs);
        assert!(fp.len() > FINGERPRINT_LEN);
        // The next segment still starts right after the content type.
        assert!(fp[102..].starts_with("5xxx"));
    }
}
