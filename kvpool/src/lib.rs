pub use crate::{
    conn::Conn,
    pool::{Error, Pool},
};

mod conn;
mod pool;
