// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for migration id parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use rapport_repository::MigrationId;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(id) = s.parse::<MigrationId>() {
            // Anything accepted must print back to an id that parses equal.
            let again: MigrationId = id.to_string().parse().unwrap();
            assert_eq!(id, again);
        }
    }
});
