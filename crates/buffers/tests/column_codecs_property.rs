use proptest::prelude::*;
use ycrdt_buffers::{
    IntDiffOptRleDecoder, IntDiffOptRleEncoder, Reader, RleDecoder, RleEncoder, StringDecoder,
    StringEncoder, UintOptRleDecoder, UintOptRleEncoder, Writer,
};

proptest! {
    #[test]
    fn var_uint_sequence_survives(values in prop::collection::vec(any::<u64>(), 0..64)) {
        let mut w = Writer::new();
        for v in &values {
            w.var_uint(*v);
        }
        let data = w.flush();
        let mut r = Reader::new(&data);
        for v in &values {
            prop_assert_eq!(r.var_uint().unwrap(), *v);
        }
        prop_assert!(r.is_empty());
    }

    #[test]
    fn rle_column(values in prop::collection::vec(0u8..4, 1..128)) {
        let mut e = RleEncoder::new();
        values.iter().for_each(|v| e.write(*v));
        let data = e.finish();
        let mut d = RleDecoder::new(&data);
        for v in &values {
            prop_assert_eq!(d.read().unwrap(), *v);
        }
    }

    #[test]
    fn uint_opt_rle_column(values in prop::collection::vec(0u64..6, 1..128)) {
        let mut e = UintOptRleEncoder::new();
        values.iter().for_each(|v| e.write(*v));
        let data = e.finish();
        let mut d = UintOptRleDecoder::new(&data);
        for v in &values {
            prop_assert_eq!(d.read().unwrap(), *v);
        }
    }

    #[test]
    fn int_diff_column(values in prop::collection::vec(-1000i64..1000, 1..128)) {
        let mut e = IntDiffOptRleEncoder::new();
        values.iter().for_each(|v| e.write(*v));
        let data = e.finish();
        let mut d = IntDiffOptRleDecoder::new(&data);
        for v in &values {
            prop_assert_eq!(d.read().unwrap(), *v);
        }
    }

    #[test]
    fn string_column(values in prop::collection::vec(".{0,8}", 1..32)) {
        let mut e = StringEncoder::new();
        values.iter().for_each(|v| e.write(v));
        let data = e.finish();
        let mut d = StringDecoder::new(&data).unwrap();
        for v in &values {
            prop_assert_eq!(d.read().unwrap(), v.as_str());
        }
    }
}
