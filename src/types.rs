// Some basic data types so that we can avoid tying ourselves to an integer type.

pub type Pid = u32;
pub type Uid = u32;

// Kilobytes, used throughout for memory quantities pulled from /proc.
pub type Kib = u64;
