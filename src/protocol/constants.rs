//! SOCKS5 Protocol Constants (RFC 1928 / RFC 1929)

// SOCKS5 Protocol Version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 Commands
pub const SOCKS5_CMD_CONNECT: u8 = 0x01;
pub const SOCKS5_CMD_BIND: u8 = 0x02;
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address Types
pub const SOCKS5_ADDR_IPV4: u8 = 0x01;
pub const SOCKS5_ADDR_DOMAIN: u8 = 0x03;
pub const SOCKS5_ADDR_IPV6: u8 = 0x04;

// Authentication Methods
pub const SOCKS5_AUTH_NONE: u8 = 0x00;
pub const SOCKS5_AUTH_USERPASS: u8 = 0x02;
pub const SOCKS5_AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// Reply Codes
pub const SOCKS5_REPLY_SUCCESS: u8 = 0x00;
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const SOCKS5_REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

// Reserved field value
pub const SOCKS5_RESERVED: u8 = 0x00;

// Username/Password sub-negotiation
pub const SOCKS5_USERPASS_VERSION: u8 = 0x01;
pub const SOCKS5_USERPASS_SUCCESS: u8 = 0x00;

/// Upper bound of every length-prefixed field (domain, username, password).
pub const MAX_FIELD_LEN: usize = 255;

/// Port assumed for proxy URLs that don't carry one.
pub const DEFAULT_PROXY_PORT: u16 = 1080;

/// VER + METHOD
pub const METHOD_SELECTION_LEN: usize = 2;

/// VER + STATUS
pub const USERPASS_REPLY_LEN: usize = 2;

/// VER + REP/CMD + RSV + ATYP
pub const REQUEST_HEADER_LEN: usize = 4;
