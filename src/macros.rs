#[cfg(not(test))]
macro_rules! debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[cfg(test)]
macro_rules! debug {
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}

#[cfg(not(test))]
macro_rules! warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

#[cfg(test)]
macro_rules! warn {
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}
