#![no_main]
use diagscrub::{Cleaner, CleanerConfig};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static CLEANER: Lazy<Option<Cleaner>> = Lazy::new(|| {
    let mut config = CleanerConfig::default();
    config.parsers.domains = vec!["example.com".to_string()];
    config.parsers.keywords = vec!["secret".to_string()];
    config.parsers.usernames = vec!["alice".to_string()];
    Cleaner::new(config).ok()
});

fuzz_target!(|data: &[u8]| {
    let (Some(cleaner), Ok(line)) = (CLEANER.as_ref(), std::str::from_utf8(data)) else {
        return;
    };
    if let Ok((once, _)) = cleaner.obfuscate_line(line) {
        // a second pass over obfuscated output must not change it
        if let Ok((twice, count)) = cleaner.obfuscate_line(&once) {
            assert_eq!(count, 0);
            assert_eq!(once, twice);
        }
    }
});
