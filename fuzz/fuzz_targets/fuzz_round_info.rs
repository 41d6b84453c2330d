#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::round::entity::RoundInfo;

// Parsing arbitrary persisted round values must never panic, and any
// accepted value must survive a persist/parse round trip with the
// round advancing by exactly one.
fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    if let Ok(info) = RoundInfo::from_persisted(Some(&raw)) {
        assert_eq!(info.current, info.previous + 1);

        if let Ok(next) = RoundInfo::from_persisted(Some(&info.persisted_value())) {
            assert_eq!(next.previous, info.current);
        }
    }
});
