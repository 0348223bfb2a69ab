/// `ceil(lhs / rhs)`
pub fn roundup_div(lhs: u64, rhs: u64) -> u64 {
    let q = lhs / rhs;
    if lhs % rhs == 0 {
        q
    } else {
        q + 1
    }
}
