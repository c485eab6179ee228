//! FTP response framing: `NNN <text>\r\n` for single-line
//! replies, `NNN-<text>\r\n` ... `NNN <text>\r\n` for multi-line.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(pub u16);

impl Code {
    pub const NEED_PASSWORD: Code = Code(331);
    pub const LOGGED_IN: Code = Code(230);
    pub const NOT_LOGGED_IN: Code = Code(530);
    pub const NO_USER: Code = Code(500);
    pub const CLOSING: Code = Code(221);
    pub const CMD_OK: Code = Code(200);
    pub const SYNTAX_ERR_PARAMS: Code = Code(501);
    pub const CMD_NOT_IMPL: Code = Code(502);
    pub const CMD_NOT_IMPL_PARAM: Code = Code(504);
    pub const FILE_STATUS_OK_OPEN: Code = Code(150);
    pub const CLOSING_DATA: Code = Code(226);
    pub const FILE_UNAVAILABLE: Code = Code(550);
    pub const TRANSFER_ABORTED: Code = Code(426);
    pub const FILE_ACTION_NOT_TAKEN: Code = Code(450);
    pub const REQUESTED_ACTION_ABORTED: Code = Code(451);
    pub const PATHNAME_CREATED: Code = Code(257);
    pub const FILE_ACTION_OK: Code = Code(250);
    pub const RESTART_MARKER: Code = Code(350);
    pub const FILE_STATUS: Code = Code(213);
    pub const SYSTEM_TYPE: Code = Code(215);
    pub const STATUS: Code = Code(211);
    pub const HELP: Code = Code(214);
    pub const FEATURES: Code = Code(211);
    pub const PASSIVE: Code = Code(227);
    pub const EXTENDED_PASSIVE: Code = Code(229);
    pub const AUTH_OK: Code = Code(234);
    pub const PROT_BAD_LEVEL: Code = Code(534);
    pub const NO_PBSZ: Code = Code(503);
    pub const COMMAND_ABORTED: Code = Code(225);
    pub const ABOR_NO_TRANSFER: Code = Code(226);
}

/// Builds a single-line reply: `NNN <text>\r\n`.
pub fn single(code: Code, text: impl AsRef<str>) -> String {
    format!("{} {}\r\n", code.0, text.as_ref())
}

/// Builds a multi-line reply: every line but the last uses the `NNN-`
/// continuation prefix, the last uses `NNN ` to mark the end.
pub fn multi(code: Code, lines: &[&str]) -> String {
    let mut out = String::new();
    if lines.is_empty() {
        out.push_str(&single(code, ""));
        return out;
    }
    for line in &lines[..lines.len() - 1] {
        out.push_str(&format!("{}-{}\r\n", code.0, line));
    }
    out.push_str(&single(code, lines[lines.len() - 1]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_format() {
        assert_eq!(single(Code::CMD_OK, "ok"), "200 ok\r\n");
    }

    #[test]
    fn multi_line_format() {
        let r = multi(Code::FEATURES, &["FEAT", "UTF8", "END"]);
        assert_eq!(r, "211-FEAT\r\n211-UTF8\r\n211 END\r\n");
    }
}
