// implementation of the byte channel.
//
// the architecture is as such:
//
// channel handles wrap around Arc<Mutex<lockable state>>
//                                       |
//          /----------------------------/
//          v
//       lockable state
//          |
//          |------ it contains a ring::Ring, which is a not-itself-concurrent ring buffer over
//          |       one block borrowed from a buffer pool. it tracks read, flushed, and write
//          |       positions, and owns all wraparound arithmetic.
//          |
//          |------ it contains a reader slot and a writer slot. each records whether an
//          |       operation owns that side of the channel, plus the waker and byte requirement
//          |       of that operation if it is suspended. a side is owned through a claim, which
//          |       resets the slot when dropped.
//          |
//          \------ it contains the close state and the join state.
//
// the organization of these modules is as such:
//
//      ring<------------core: owns the mutex, claims, suspension, and closing. safe and
//                        ^    minimal but inconvenient.
//                        |
//      view<------------api: convenient typed, bulk, text, and zero-copy operations as
//                        ^   methods on ByteChannel. the crate re-exports this API publicly.
//                        |
//                       join: joining and copying one ByteChannel into another.
//
// there is also the error module, which contains the relevant error types, which is also
// re-exported publicly.

pub(crate) mod error;
pub(crate) mod api;
pub(crate) mod view;
pub(crate) mod core;
pub(crate) mod ring;

mod join;
