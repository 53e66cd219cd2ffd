use std::any::type_name;
use std::fmt::Debug;
use std::io;

use codeq::Codec;

/// Asserts that `v` encodes to exactly `encoded_bytes` and decodes back to
/// itself.
#[allow(dead_code)]
pub(crate) fn test_codec<D: Codec + PartialEq + Debug>(
    encoded_bytes: &[u8],
    v: &D,
) -> Result<(), io::Error> {
    let mes = format!("Type: {} data: {:?}", type_name::<D>(), encoded_bytes);

    // Test encoding
    {
        let mut b = Vec::new();
        let n = v.encode(&mut b)?;
        assert_eq!(n, b.len(), "output len, {}", &mes);
        assert_eq!(b, encoded_bytes, "output data, {}", &mes);
    }

    // Test decoding
    {
        let b = encoded_bytes.to_vec();
        let decoded = D::decode(&mut b.as_slice())?;
        assert_eq!(v, &decoded, "decode, {}", &mes);
    }

    Ok(())
}
