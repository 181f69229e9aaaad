#![allow(unused_imports)]
#![allow(unused_macros)]

// Populate a HashMap, used by tests to build up fake /proc file contents.
#[cfg(test)]
macro_rules! map(
    { $($key:expr => $value:expr),+ } => {
        {
            let mut m = ::std::collections::HashMap::new();
            $(
                m.insert($key, $value);
            )+
            m
        }
     };
);

#[cfg(test)]
pub(crate) use map;

// Carve up a line of text into space-separated chunks + the start indices of the chunks.
pub fn chunks(input: &str) -> (Vec<usize>, Vec<&str>) {
    let mut start_indices: Vec<usize> = Vec::new();
    let mut parts: Vec<&str> = Vec::new();

    let mut last_index = 0;
    for (index, c) in input.char_indices() {
        if c.is_whitespace() {
            if last_index != index {
                start_indices.push(last_index);
                parts.push(&input[last_index..index]);
            }
            last_index = index + 1;
        }
    }

    if last_index < input.len() {
        start_indices.push(last_index);
        parts.push(&input[last_index..]);
    }

    (start_indices, parts)
}

// Round `n` to 1 decimal place, used for displayed percentages.
pub fn one_place(n: f64) -> f64 {
    (n * 10.0).round() / 10.0
}

// Strip leading/trailing non-word characters (anything but alphanumerics, `_`, `-`, `.`) from a
// basename, as seen in e.g. `python3\0` or `(firefox)`-shaped fragments.
pub fn strip_nonword(s: &str) -> &str {
    s.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '.'))
}

#[test]
fn test_chunks() {
    let (starts, parts) = chunks("  pid  user   cmd  ");
    assert!(parts == vec!["pid", "user", "cmd"]);
    assert!(starts == vec![2, 7, 15]);
}

#[test]
fn test_one_place() {
    assert!(one_place(12.34) == 12.3);
    assert!(one_place(12.37) == 12.4);
}

#[test]
fn test_strip_nonword() {
    assert!(strip_nonword("(firefox)") == "firefox");
    assert!(strip_nonword("python3") == "python3");
    assert!(strip_nonword("---") == "");
    assert!(strip_nonword("  foo.bar  ") == "foo.bar");
}
