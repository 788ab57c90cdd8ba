use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub http_host: String,
    pub http_port: u16,
    pub socket_port: u16,
    pub photo_dir: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            mongo_uri: env_or("MONGO_URI", "mongodb://127.0.0.1:27017/souq"),
            http_host: env_or("HTTP_HOST", "0.0.0.0"),
            http_port: port_or("HTTP_PORT", 8082),
            socket_port: port_or("SOCKET_PORT", 8083),
            photo_dir: env_or("PHOTO_DIR", "public/img"),
        }
    }

    pub fn http_addr(&self) -> (String, u16) {
        (self.http_host.clone(), self.http_port)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.socket_port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn port_or(key: &str, default: u16) -> u16 {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(port) => port,
            Err(_) => {
                log::warn!("{} is not a valid port, using {}", key, default);
                default
            }
        },
        Err(_) => default,
    }
}
