//! Property tests for the pipeline inverse law: for every root,
//! `on_read(on_write(x)) == x`, alone and chained, over arbitrary bytes.

use std::sync::Arc;

use proptest::prelude::*;

use acorn_db::pipeline::compression::{CompressionAlgorithm, CompressionRoot};
use acorn_db::pipeline::encryption::EncryptionRoot;
use acorn_db::pipeline::{PipelineOp, Root, RootContext, RootPipeline};

fn write_ctx() -> RootContext {
    RootContext::new(PipelineOp::Write, Some("prop-doc".to_string()))
}

fn read_ctx() -> RootContext {
    RootContext::new(PipelineOp::Read, Some("prop-doc".to_string()))
}

fn assert_inverse(root: &dyn Root, payload: &[u8]) {
    let written = root.on_write(payload, &mut write_ctx()).expect("write");
    let read = root.on_read(&written, &mut read_ctx()).expect("read");
    assert_eq!(read, payload);
}

proptest! {
    #[test]
    fn gzip_inverts(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        assert_inverse(&CompressionRoot::new(CompressionAlgorithm::Gzip), &payload);
    }

    #[test]
    fn brotli_inverts(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        assert_inverse(&CompressionRoot::new(CompressionAlgorithm::Brotli), &payload);
    }

    #[test]
    fn identity_inverts(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        assert_inverse(&CompressionRoot::new(CompressionAlgorithm::Identity), &payload);
    }

    #[test]
    fn aes_cbc_inverts(
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        key in proptest::array::uniform32(any::<u8>()),
        iv in proptest::array::uniform16(any::<u8>()),
    ) {
        assert_inverse(&EncryptionRoot::from_key(key, iv), &payload);
    }

    /// The full chain inverts and accumulates signatures deterministically.
    #[test]
    fn chained_pipeline_inverts(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let pipeline = RootPipeline::with_roots(vec![
            Arc::new(CompressionRoot::new(CompressionAlgorithm::Gzip)),
            Arc::new(EncryptionRoot::from_key([11; 32], [7; 16])),
        ]);

        let mut wctx = write_ctx();
        let stored = pipeline.on_write(payload.clone(), &mut wctx).expect("write");
        prop_assert_eq!(&wctx.signatures, &vec!["gzip".to_string(), "aes256".to_string()]);

        let mut rctx = read_ctx();
        let restored = pipeline.on_read(stored, &mut rctx).expect("read");
        prop_assert_eq!(restored, payload);
        prop_assert_eq!(&rctx.signatures, &vec!["aes256".to_string(), "gzip".to_string()]);
    }
}
