pub mod resend;
pub mod sendgrid;

pub use resend::ResendAdapter;
pub use sendgrid::SendGridAdapter;
