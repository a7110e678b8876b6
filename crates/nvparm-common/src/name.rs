/// Collapses a UTF-16LE partition name to its 8-bit form.
///
/// GPT names store ASCII as `ch 00` pairs. Interior NUL bytes are
/// dropped and the scan stops once three consecutive NUL bytes are
/// seen, which covers both the terminator and trailing padding. Names
/// outside ASCII are not part of the tool's recognized set and come out
/// mangled rather than rejected.
pub fn collapse_utf16le(raw: &[u8]) -> String {
    let mut out = String::new();
    let mut zeros = 0;
    for &b in raw {
        if b == 0 {
            zeros += 1;
            if zeros > 2 {
                break;
            }
        } else {
            zeros = 0;
            out.push(b as char);
        }
    }
    out
}
