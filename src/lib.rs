/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod args;
pub mod config;
pub mod file;
pub mod fs_wrap;
pub mod governor;
pub mod path;
pub mod pattern;
pub mod registry;
pub mod runner;
pub mod stats;
pub mod tree;
pub mod verifier;
pub mod writer;
