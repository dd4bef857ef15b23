// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for policy generation parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use rapport_authz::PolicyGeneration;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(generation) = s.parse::<PolicyGeneration>() {
            assert_eq!(generation.to_string().parse::<PolicyGeneration>().ok(), Some(generation));
        }
    }
});
