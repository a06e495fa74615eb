#![cfg_attr(feature = "clippy", feature(plugin))]
#![cfg_attr(feature = "clippy", plugin(clippy(conf_file = "../.clippy.toml")))]

mod decode;
mod encode;
pub mod error;
mod packet;

pub use decode::decode;
pub use encode::WriteTo;
pub use error::{DecodeError, EncodeError};
pub use packet::{
    Connack, Connect, ConnectFlags, ConnectReturnCode, FixedHeader, Packet, PacketId, Puback,
    Pubcomp, Publish, PublishFlags, Pubrec, Pubrel, QoS, Suback, Subscribe, SubscribeResult, Type,
    Unsuback, Unsubscribe, Will, PROTOCOL_LEVEL, PROTOCOL_NAME,
};
