use std::net::{IpAddr, Ipv4Addr};

const HUB_PORT: &str = "HUB_PORT";

pub const DEFAULT_PORT: u16 = 8080;

pub fn get_port() -> Option<u16> {
    std::env::var(HUB_PORT).ok().and_then(|res| res.parse().ok())
}

const HUB_ADDR: &str = "HUB_ADDR";

pub const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

pub fn get_addr() -> Option<IpAddr> {
    std::env::var(HUB_ADDR).ok().and_then(|res| res.parse().ok())
}

const HUB_SECRET: &str = "HUB_SECRET";

pub fn get_secret() -> Option<String> {
    std::env::var(HUB_SECRET).ok().filter(|secret| !secret.is_empty())
}
