/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory on the filesystem to test in
    pub testdir: String,

    /// Goal percentage used of the filesystem
    #[arg(short, long, default_value_t = 90, value_parser = clap::value_parser!(u64).range(1..=99))]
    pub percent: u64,

    /// Total wall-clock limit in seconds, -1 means run forever
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    pub timeout: i64,

    /// Verify every file right after writing it
    #[arg(short, long, default_value_t = false)]
    pub immediate: bool,

    /// Soft ceiling on the number of live files
    #[arg(short = 'f', long)]
    pub max_files: Option<usize>,

    /// Smallest file size as a power of two (2^min-bits bytes)
    #[arg(long, default_value_t = 20)]
    pub min_bits: u32,

    /// Largest file size as a power of two (2^max-bits bytes)
    #[arg(long, default_value_t = 30)]
    pub max_bits: u32,

    /// Stop at the first verification failure
    #[arg(long, default_value_t = false)]
    pub error_stop: bool,

    /// Open files with O_DIRECT half of the time
    #[arg(long, default_value_t = false)]
    pub direct_io: bool,

    /// Keep the test tree after a clean run
    #[arg(long, default_value_t = false)]
    pub keep_fs: bool,

    /// Path to tuning configuration in TOML format
    #[arg(long, default_value_t = String::from("./config.toml"))]
    pub config_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["fstress", "/mnt/test"]);
        assert_eq!("/mnt/test", args.testdir);
        assert_eq!(90, args.percent);
        assert_eq!(-1, args.timeout);
        assert_eq!(20, args.min_bits);
        assert_eq!(30, args.max_bits);
        assert!(!args.immediate);
        assert!(!args.error_stop);
        assert!(!args.direct_io);
    }

    #[test]
    fn test_percent_range() {
        assert!(Args::try_parse_from(["fstress", "/mnt/test", "-p", "0"]).is_err());
        assert!(Args::try_parse_from(["fstress", "/mnt/test", "-p", "100"]).is_err());
        assert!(Args::try_parse_from(["fstress", "/mnt/test", "-p", "99"]).is_ok());
    }

    #[test]
    fn test_negative_timeout() {
        let args = Args::parse_from(["fstress", "/mnt/test", "-t", "-1"]);
        assert_eq!(-1, args.timeout);
    }
}
