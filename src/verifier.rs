/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Verifier worker: walks the registry in index order, verifying every
//! file it can lock, wrapping to the head at the tail. Tolerates index
//! shifts from governor erases; a file at a shifted index is just as good
//! to verify.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::file::CheckOutcome;
use crate::registry::Shared;

pub fn run(shared: Arc<Shared>) -> anyhow::Result<()> {
    let cfg = &shared.config;
    let mut index: usize = 0;
    loop {
        if shared.stopping() {
            return Ok(());
        }

        let file = {
            let st = shared.lock();
            if st.registry.len() < 2 {
                None
            } else {
                if index >= st.registry.len() {
                    index = 0;
                }
                Some(st.registry[index].clone())
            }
        };
        let Some(file) = file else {
            thread::sleep(Duration::from_secs(1));
            continue;
        };

        // busy means the governor is on it; skip ahead
        let Some(mut fst) = file.try_lock() else {
            index += 1;
            continue;
        };
        if fst.in_delete {
            drop(fst);
            index += 1;
            continue;
        }

        let outcome = file.verify(&mut fst, cfg)?;
        drop(fst);
        if let CheckOutcome::Corrupt(_) = outcome {
            shared.flag_error();
        }
        if shared.stopping() {
            return Ok(());
        }

        {
            let mut st = shared.lock();
            st.stats.now.read += file.size;
            st.stats.num_read += 1;
            st.last_read_index = index;
        }
        index += 1;

        pace(&shared, &mut index);
    }
}

/// Before the volume first fills, trail the registry tail by
/// `verifier_gap` files so fresh writes age out of the cache before they
/// are read. In write/delete mode just wrap at the tail.
fn pace(shared: &Shared, index: &mut usize) {
    let gap = shared.config.tuning.verifier_gap;
    loop {
        if shared.stopping() {
            return;
        }
        let (was_full, len) = {
            let st = shared.lock();
            (st.was_full, st.registry.len())
        };
        if was_full {
            if *index >= len {
                *index = 0;
            }
            return;
        }
        if *index + gap < len {
            return;
        }
        thread::sleep(Duration::from_secs(1));
        if shared.lock().was_full {
            *index = 0;
            return;
        }
    }
}
