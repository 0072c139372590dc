pub mod history;
pub mod kline_stream;
pub mod series;
pub mod supervisor;
pub mod ticker_stream;

// Re-export the core series types for convenient access
// (e.g. `use crate::market_data::Bar`).
pub use series::{ApplyOutcome, Bar, BarSeries, SeriesKey, SeriesStore};
pub use ticker_stream::{TickerBoard, TickerSnapshot};

/// Concrete websocket stream type shared by the channel modules.
pub(crate) type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
