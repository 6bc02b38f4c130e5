// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod log;

/// Like `println!`, but silently exits on broken pipe (EPIPE) instead of
/// panicking. Other I/O errors still panic.
#[macro_export]
macro_rules! println_nopipe {
    () => {
        {
            use std::io::Write;
            let r = writeln!(std::io::stdout());
            match r {
                Ok(_) => {},
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    std::process::exit(0);
                },
                Err(e) => panic!("failed printing to stdout: {e}"),
            }
        }
    };
    ($($arg:tt)*) => {
        {
            use std::io::Write;
            let r = writeln!(std::io::stdout(), $($arg)*);
            match r {
                Ok(_) => {},
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    std::process::exit(0);
                },
                Err(e) => panic!("failed printing to stdout: {e}"),
            }
        }
    };
}

#[macro_export]
macro_rules! lock {
    ($mtx:expr) => {
        $mtx.lock().expect("lock mutex")
    };
}
