mod host;

pub use host::MockHost;

use crate::metadata::method::{write_fat_header, MethodBodyFlags};

/// Method body with a tiny header around `code`
pub fn tiny_body(code: &[u8]) -> Vec<u8> {
    assert!(code.len() < 64);
    let mut body = vec![((code.len() as u8) << 2) | 0x2];
    body.extend_from_slice(code);
    body
}

/// Method body with a fat header around `code`, without extra sections
pub fn fat_body(code: &[u8], max_stack: u16, local_var_sig_token: u32) -> Vec<u8> {
    let mut body = Vec::new();
    write_fat_header(
        &mut body,
        MethodBodyFlags::INIT_LOCALS,
        max_stack,
        code.len() as u32,
        local_var_sig_token,
    );
    body.extend_from_slice(code);
    body
}
