#![warn(missing_docs)]
/*! APX is a signal-routing protocol used to exchange typed automotive
signals (vehicle speed, gear mode, warning flags, structured records)
between producer and consumer nodes through a central broker.

This crate implements the *connection core*: the RemoteFile framing
layer ([`rmf`], [`numheader`]), the per-connection file manager that
coordinates a bidirectional inventory of memory-mapped "files"
([`file_manager`], [`file_map`], [`file_info`]), the APX virtual machine
that compiles type signatures into byte-code programs and uses them to
pack/unpack typed values to/from wire buffers ([`compiler`], [`vm`],
[`program`], [`value`]), the node lifecycle state machines that drive
definition exchange and port-data exchange end-to-end ([`node_signature`],
[`node_data`]), and the broker routing responsibility that maps a
provide-port write to the require-port writes it triggers ([`broker`]).

Out of scope, treated as external collaborators: concrete transports
(only the byte-stream contract matters, see [`connection`]), CLI
wrappers, and a full APX-definition grammar ([`node_text`] ships a
minimal reader so the rest of the crate has something to parse
against).

# Example

```
use apx::node_text::{DefinitionParser, TextDefinitionParser};
use apx::node_data::NodeInstance;

let text = "APX/1.2\nN\"TestNode1\"\nP\"ProvidePort1\"C(0,3)\nP\"ProvidePort2\"C(0,7)\n";
let sig = TextDefinitionParser.parse(text)?;
let node = NodeInstance::new(sig, text);
assert_eq!(node.signature.name, "TestNode1");
# Ok::<(), apx::error::Error>(())
```
*/

pub mod broker;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod error;
pub mod file_info;
pub mod file_manager;
pub mod file_map;
pub mod node_data;
pub mod node_signature;
pub mod node_text;
pub mod numheader;
pub mod pack;
pub mod program;
pub mod rmf;
pub mod value;
pub mod vm;

pub use error::{Error, Result};
