//! Error code constants

/// Bundling error codes (0100-0199)
pub const ERR_MODULE_NOT_FOUND: &str = "E-SANDTEST-0100";
pub const ERR_PARSE: &str = "E-SANDTEST-0101";
pub const ERR_ENTRY_NOT_FOUND: &str = "E-SANDTEST-0102";
pub const ERR_PARSER_INIT: &str = "E-SANDTEST-0103";
pub const ERR_NO_ENTRIES: &str = "E-SANDTEST-0104";
pub const ERR_UNSUPPORTED_EXPORT: &str = "E-SANDTEST-0105";

/// Transpile error codes (0200-0299)
pub const ERR_TRANSPILE_PARSE: &str = "E-SANDTEST-0200";
pub const ERR_TRANSPILE_UNSUPPORTED: &str = "E-SANDTEST-0201";

/// Sandbox error codes (0300-0399)
pub const ERR_SANDBOX_TIMEOUT: &str = "E-SANDTEST-0300";
pub const ERR_SANDBOX_CONTEXT: &str = "E-SANDTEST-0301";
pub const ERR_SANDBOX_DISCONNECTED: &str = "E-SANDTEST-0302";
pub const ERR_SANDBOX_SPAWN: &str = "E-SANDTEST-0303";

/// Runner error codes (0400-0499)
pub const ERR_HOOK_FAILED: &str = "E-SANDTEST-0400";
pub const ERR_RUN_ABORTED: &str = "E-SANDTEST-0401";

/// Prefix carried by every guidance error thrown for unsupported test APIs.
pub const GUIDANCE_PREFIX: &str = "[sandtest]";
