//! The bootprep binary; all logic lives in bootprep-lib.

fn main() {
    bootprep_utils::run_main(|| bootprep_lib::cli::run_from_iter(std::env::args_os()))
}
