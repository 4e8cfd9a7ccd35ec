pub mod trace_id;

pub use trace_id::{trace_id_middleware, TraceId, TRACE_ID_HEADER};
