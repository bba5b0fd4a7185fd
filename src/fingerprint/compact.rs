//! Unpadded fingerprint: plain hex of every field, body length as 16 hex
//! digits, then the whole short body or the sampled positions.

use std::fmt::Write;

use super::{SAMPLE_THRESHOLD, ValidatedRequest, sample_positions};

fn push_hex(out: &mut String, bytes: &[u8]) {
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
}

pub fn encode(request: &ValidatedRequest<'_>) -> String {
    let body = request.body;
    let mut out = String::with_capacity(
        2 * (request.host.len()
            + request.content_type.len()
            + request.path.len()
            + request.method.len())
            + 16
            + 2 * body.len().min(SAMPLE_THRESHOLD),
    );

    push_hex(&mut out, request.host.as_bytes());
    push_hex(&mut out, request.content_type.as_bytes());
    let _ = write!(out, "{:016x}", body.len());
    push_hex(&mut out, request.path.as_bytes());
    push_hex(&mut out, request.method.as_bytes());

    if body.len() < SAMPLE_THRESHOLD {
        push_hex(&mut out, body);
    } else {
        for position in sample_positions(body.len()) {
            push_hex(&mut out, &body[position..=position]);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::fingerprint::tests::attrs;

    fn fingerprint(body: &str) -> String {
        encode(&attrs(body).validate().expect("valid request"))
    }

    #[test]
    fn known_layout() {
        assert_eq!(
            fingerprint("Frase"),
            concat!(
                "6c6f63616c686f73743a33323132",
                "6170706c69636174696f6e2f6a736f6e",
                "0000000000000005",
                "2f76312f70726f6475637473",
                "504f5354",
                "4672617365",
            )
        );
    }

    #[test]
    fn long_bodies_contribute_eleven_samples() {
        let short = fingerprint("Frase de te");
        let long = fingerprint("Frase de teste um tanto quanto longa de certa forma");
        let prefix_len = short.len() - 2 * "Frase de te".len();
        assert_eq!(long.len(), prefix_len + 22);
    }

    #[test]
    fn deterministic_and_distinct() {
        let mut message = String::from("Frase de teste um tanto quanto longa de certa forma");
        assert_eq!(fingerprint(&message), fingerprint(&message));

        let mut seen = HashSet::new();
        for _ in 0..20_000 {
            assert!(seen.insert(fingerprint(&message)));
            message.push('a');
        }
    }

    #[test]
    fn differs_from_tagged_scheme() {
        let attrs = attrs("Frase");
        let request = attrs.validate().expect("valid request");
        assert_ne!(encode(&request), crate::fingerprint::tagged::encode(&request));
    }
}
