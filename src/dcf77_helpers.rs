/// Returns the binary-encoded value of the given buffer over the given range, or None if the input is invalid.
///
/// # Arguments
/// * `bit_buffer` - buffer containing the bits
/// * `start` - start bit position (least significant)
/// * `stop` - stop bit position (most significant)
pub fn get_binary_value(bit_buffer: &[Option<bool>], start: usize, stop: usize) -> Option<u16> {
    let mut val = 0;
    let mut mult = 1;
    for b in &bit_buffer[start..=stop] {
        (*b)?;
        val += mult * b.unwrap() as u16;
        mult *= 2;
    }
    Some(val)
}
