//! Safe-by-construction byte reinterpretation helpers used by the CPU-side tensor buffers.

/// Views `value` as a slice of raw bytes.
pub fn value_as_u8_slice<T: Copy>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) }
}

/// Views `slice` as a slice of raw bytes.
pub fn array_as_u8_slice<T: Copy>(slice: &[T]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            slice.as_ptr() as *const u8,
            std::mem::size_of_val(slice),
        )
    }
}

/// Views `slice` as a mutable slice of raw bytes.
pub fn array_as_u8_slice_mut<T: Copy>(slice: &mut [T]) -> &mut [u8] {
    unsafe {
        std::slice::from_raw_parts_mut(
            slice.as_mut_ptr() as *mut u8,
            std::mem::size_of_val(slice),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let values: [f32; 4] = [1.0, 2.0, 3.0, 4.0];
        let bytes = array_as_u8_slice(&values);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    }
}
