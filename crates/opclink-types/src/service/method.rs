// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Call (method invocation) service messages.

use serde::{Deserialize, Serialize};

use crate::diagnostic_info::DiagnosticInfo;
use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::variant::Variant;

use super::{RequestHeader, ResponseHeader};

/// One method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethodRequest {
    /// The object (or object type) the method belongs to.
    pub object_id: NodeId,

    /// The method node.
    pub method_id: NodeId,

    /// Input arguments, in declaration order.
    pub input_arguments: Option<Vec<Variant>>,
}

binary_encodable_impl!(CallMethodRequest: object_id, method_id, input_arguments);

/// Result of one method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CallMethodResult {
    /// Result of the call itself.
    pub status_code: StatusCode,

    /// Per-argument validation results.
    pub input_argument_results: Option<Vec<StatusCode>>,

    /// Diagnostics for the argument results.
    pub input_argument_diagnostic_infos: Option<Vec<DiagnosticInfo>>,

    /// Output arguments, in declaration order.
    pub output_arguments: Option<Vec<Variant>>,
}

binary_encodable_impl!(CallMethodResult:
    status_code,
    input_argument_results,
    input_argument_diagnostic_infos,
    output_arguments,
);

/// Invokes one or more methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The methods to invoke.
    pub methods_to_call: Option<Vec<CallMethodRequest>>,
}

binary_encodable_impl!(CallRequest: request_header, methods_to_call);

/// Results of a Call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CallResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One result per invocation, in order.
    pub results: Option<Vec<CallMethodResult>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(CallResponse: response_header, results, diagnostic_infos);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BinaryEncodable, DecodingOptions};
    use std::io::Cursor;

    #[test]
    fn test_call_request_round_trip() {
        let request = CallRequest {
            request_header: RequestHeader::default(),
            methods_to_call: Some(vec![CallMethodRequest {
                object_id: NodeId::numeric(2, 10),
                method_id: NodeId::numeric(2, 11),
                input_arguments: Some(vec![Variant::Int32(5), "reset".into()]),
            }]),
        };
        let buf = request.encode_to_vec().unwrap();
        let decoded =
            CallRequest::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(request, decoded);
    }
}
