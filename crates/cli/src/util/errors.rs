use crate::rpc::client;
use std::path::Path;

pub fn render_rpc_failure(action: &str, sock: &Path, err: &client::Error) -> String {
  match err {
    client::Error::Client(_) | client::Error::Http(_) => format!(
      "{} failed: daemon not reachable at {}.",
      action,
      sock.display()
    ),
    client::Error::Rpc { code, message } => format!("{action} failed ({code}): {message}"),
    _ => format!("{} failed: {}", action, err),
  }
}

/// Print the failure and exit non-zero.
pub fn exit_with_rpc_failure(action: &str, sock: &Path, err: &client::Error) -> ! {
  eprintln!("{}", render_rpc_failure(action, sock, err));
  std::process::exit(1);
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn rpc_errors_show_code_and_message() {
    let err = client::Error::Rpc {
      code: -32001,
      message: "run not found: r1".into(),
    };
    assert_eq!(
      render_rpc_failure("show", Path::new("/tmp/weft.sock"), &err),
      "show failed (-32001): run not found: r1"
    );
  }

  #[test]
  fn http_status_falls_back_to_display() {
    let err = client::Error::HttpStatus(500, "boom".into());
    assert_eq!(
      render_rpc_failure("list", Path::new("/tmp/weft.sock"), &err),
      "list failed: http status 500: boom"
    );
  }
}
