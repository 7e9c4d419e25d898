use background_logger::record::{self, ArgList, RECORD_HEADER_BYTES};
use std::time::Duration;

const CANARY: u8 = 0xA5;

/// Encodes into the middle of a canary-filled buffer and checks both sides
/// stay untouched.
fn encode_guarded<L: ArgList + ?Sized>(slot: usize, args: &L) -> Vec<u8> {
    let mut region = vec![CANARY; slot * 3];
    let encoded = record::encode(&mut region[slot..slot * 2], args);
    assert!(encoded.len <= slot);
    assert!(region[..slot].iter().all(|&b| b == CANARY), "slot before was overwritten");
    assert!(region[slot * 2..].iter().all(|&b| b == CANARY), "slot after was overwritten");
    region[slot..slot * 2].to_vec()
}

fn rendered(template: &str, bytes: &[u8]) -> String {
    let mut out = String::new();
    record::render(template, bytes, &mut out).unwrap();
    out
}

fn direct<L: ArgList + ?Sized>(template: &str, args: &L) -> String {
    let mut out = String::new();
    record::render_direct(template, args, &mut out).unwrap();
    out
}

#[test]
fn test_deferred_matches_direct_rendering() {
    let template = "%d|%u|%.3f|%s|%s|%c|%x";
    let args = (-42i64, 7u16, 2.5f64, "abc", "", 'z', 255u32);

    let bytes = encode_guarded(128, &args);
    assert_eq!(rendered(template, &bytes), direct(template, &args));
    assert_eq!(rendered(template, &bytes), "-42|7|2.500|abc||z|ff");
}

#[test]
fn test_bool_and_duration_render() {
    let args = (true, Duration::from_millis(1500));
    let bytes = encode_guarded(64, &args);
    assert_eq!(rendered("%s %s", &bytes), direct("%s %s", &args));
}

#[test]
fn test_oversized_text_is_prefix_and_terminated() {
    let slot = 96;
    let long: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let bytes = encode_guarded(slot, &(long.as_str(),));

    let text = rendered("%s", &bytes);
    assert!(!text.is_empty());
    assert!(long.starts_with(&text));
    // tag and terminator take the rest
    assert_eq!(text.len(), slot - RECORD_HEADER_BYTES - 2);
}

#[test]
fn test_many_texts_share_the_budget() {
    let slot = 64;
    let words = ["alpha".repeat(20), "bravo".repeat(20), "charlie".repeat(20)];
    let args = (words[0].as_str(), words[1].as_str(), words[2].as_str(), 9u8);
    let bytes = encode_guarded(slot, &args);

    let text = rendered("%s/%s/%s/%u", &bytes);
    let parts: Vec<&str> = text.split('/').collect();
    assert_eq!(parts.len(), 4);
    for (part, word) in parts.iter().zip(&words) {
        assert!(word.starts_with(part));
    }
    assert_eq!(parts[3], "9");
}

#[test]
fn test_too_many_fixed_args_flagged_not_overflowed() {
    let slot = 16;
    let args = (1u64, 2u64, 3u64);
    let bytes = encode_guarded(slot, &args);

    let (info, _) = record::decode(&bytes).unwrap();
    assert!(info.args_truncated);
    assert_eq!(info.args, 1);
    let mut out = String::new();
    assert!(record::render("%u %u %u", &bytes, &mut out).is_err());
}

#[test]
fn test_decoding_garbage_terminates() {
    // xorshift, so the run is reproducible
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    for _ in 0..2000 {
        let mut bytes = [0u8; 48];
        for b in bytes.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *b = state as u8;
        }
        let mut out = String::new();
        // success or failure both fine; it must return
        let _ = record::render("%s %s %s %s", &bytes, &mut out);
        if let Ok((info, decoder)) = record::decode(&bytes) {
            assert!(decoder.count() <= info.args);
        }
    }
}
