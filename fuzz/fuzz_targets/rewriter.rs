#![no_main]

use cilwrap::{
    disassembler::decode_code,
    metadata::method::{BodyScanner, HeaderInfoProvider, MethodBody},
    rewriter::{BodyRewriter, RewriterConfig},
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(info) = BodyScanner.header_info(data) else {
        return;
    };

    let Ok(out) = BodyRewriter::new(data, &info, &RewriterConfig::default()).rewrite() else {
        return;
    };

    // Whatever the rewriter accepts has to decode again
    let parsed = MethodBody::from(&out).expect("rewritten header");
    let code = &out[parsed.code_range()];
    if info.return_count > 1 {
        assert!(decode_code(code).expect("rewritten code").all_valid());
    }
});
