//! AppleScript programs driven through `osascript`
//!
//! Enumerated values travel as four-character codes in `argv` and are turned
//! into constants with `constantFor`. Results are tab-separated lines.

use super::Script;

/// Handlers shared by every script.
pub const PRELUDE: &str = r#"
on findVm(ident)
	tell application "UTM"
		try
			return virtual machine id ident
		end try
		return virtual machine named ident
	end tell
end findVm

on constantFor(code)
	return run script ("«constant ****" & code & "»")
end constantFor

on codeText(value)
	if value is missing value then return ""
	return value as text
end codeText
"#;

pub const LIST_VMS: Script = Script {
    name: "list_vms",
    body: r#"
on run argv
	set out to ""
	tell application "UTM"
		repeat with vm in virtual machines
			set out to out & "vm" & tab & (id of vm) & tab & (name of vm) & tab & my codeText(status of vm) & tab & my codeText(backend of vm) & linefeed
		end repeat
	end tell
	return out
end run
"#,
};

pub const INSPECT_VM: Script = Script {
    name: "inspect_vm",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	tell application "UTM"
		set config to configuration of vm
		set out to "vm" & tab & (id of vm) & tab & (name of vm) & tab & my codeText(status of vm) & tab & my codeText(backend of vm) & linefeed
		try
			set out to out & "arch" & tab & (architecture of config) & linefeed
		end try
		repeat with d in drives of config
			set driveInterface to ""
			try
				set driveInterface to my codeText(interface of d)
			end try
			set out to out & "drive" & tab & driveInterface & tab & ((removable of d) as text) & tab & my codeText(host size of d) & linefeed
		end repeat
		repeat with nic in network interfaces of config
			set out to out & "net" & tab & ((index of nic) as text) & tab & my codeText(mode of nic) & linefeed
			try
				repeat with fwd in port forwards of nic
					set out to out & "fwd" & tab & ((index of nic) as text) & tab & my codeText(protocol of fwd) & tab & my codeText(guest address of fwd) & tab & ((guest port of fwd) as text) & tab & my codeText(host address of fwd) & tab & ((host port of fwd) as text) & linefeed
				end repeat
			end try
		end repeat
	end tell
	return out
end run
"#,
};

pub const CREATE_VM: Script = Script {
    name: "create_vm",
    body: r#"
on run argv
	set vmName to item 1 of argv
	set vmBackend to my constantFor(item 2 of argv)
	set vmArch to item 3 of argv
	tell application "UTM"
		set vm to make new virtual machine with properties {backend:vmBackend, configuration:{name:vmName, architecture:vmArch}}
		return id of vm
	end tell
end run
"#,
};

pub const CONFIGURE_HARDWARE: Script = Script {
    name: "configure_hardware",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	tell application "UTM"
		set config to configuration of vm
		set cpu cores of config to (item 2 of argv) as integer
		set memory of config to (item 3 of argv) as integer
		try
			set uefi of config to ((item 4 of argv) is "true")
		end try
		update configuration of vm with config
	end tell
	return ""
end run
"#,
};

pub const ADD_DRIVE: Script = Script {
    name: "add_drive",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	set driveSize to (item 3 of argv) as integer
	if item 2 of argv is "" then
		set newDrive to {guest size:driveSize}
	else
		set newDrive to {interface:my constantFor(item 2 of argv), guest size:driveSize}
	end if
	tell application "UTM"
		set config to configuration of vm
		set drives of config to (drives of config) & {newDrive}
		update configuration of vm with config
	end tell
	return ""
end run
"#,
};

pub const ATTACH_MEDIA: Script = Script {
    name: "attach_media",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	set mediaFile to POSIX file (item 3 of argv)
	if item 2 of argv is "" then
		set newDrive to {removable:true, source:mediaFile}
	else
		set newDrive to {removable:true, interface:my constantFor(item 2 of argv), source:mediaFile}
	end if
	tell application "UTM"
		set config to configuration of vm
		set drives of config to (drives of config) & {newDrive}
		update configuration of vm with config
	end tell
	return ""
end run
"#,
};

pub const ADD_NETWORK: Script = Script {
    name: "add_network",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	set nicMode to my constantFor(item 2 of argv)
	tell application "UTM"
		set config to configuration of vm
		set network interfaces of config to (network interfaces of config) & {{mode:nicMode}}
		update configuration of vm with config
		return ((count of network interfaces of config) - 1) as text
	end tell
end run
"#,
};

pub const ADD_PORT_FORWARD: Script = Script {
    name: "add_port_forward",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	set nicPosition to ((item 2 of argv) as integer) + 1
	set rule to {protocol:my constantFor(item 3 of argv), guest port:(item 5 of argv) as integer, host address:item 6 of argv, host port:(item 7 of argv) as integer}
	if item 4 of argv is not "" then set rule to rule & {guest address:item 4 of argv}
	tell application "UTM"
		set config to configuration of vm
		set nics to network interfaces of config
		set nic to item nicPosition of nics
		set port forwards of nic to (port forwards of nic) & {rule}
		set item nicPosition of nics to nic
		set network interfaces of config to nics
		update configuration of vm with config
	end tell
	return ""
end run
"#,
};

pub const REMOVE_PORT_FORWARD: Script = Script {
    name: "remove_port_forward",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	set nicPosition to ((item 2 of argv) as integer) + 1
	set ruleProtocol to my constantFor(item 3 of argv)
	set rulePort to (item 4 of argv) as integer
	tell application "UTM"
		set config to configuration of vm
		set nics to network interfaces of config
		set nic to item nicPosition of nics
		set kept to {}
		repeat with fwd in port forwards of nic
			if not ((protocol of fwd is ruleProtocol) and (guest port of fwd is rulePort)) then set end of kept to contents of fwd
		end repeat
		set port forwards of nic to kept
		set item nicPosition of nics to nic
		set network interfaces of config to nics
		update configuration of vm with config
	end tell
	return ""
end run
"#,
};

pub const START_VM: Script = Script {
    name: "start_vm",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	tell application "UTM" to start vm
	return ""
end run
"#,
};

pub const STOP_VM: Script = Script {
    name: "stop_vm",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	tell application "UTM" to stop vm
	return ""
end run
"#,
};

pub const DELETE_VM: Script = Script {
    name: "delete_vm",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	tell application "UTM" to delete vm
	return ""
end run
"#,
};

pub const APP_VERSION: Script = Script {
    name: "app_version",
    body: r#"
on run argv
	tell application "UTM" to return version
end run
"#,
};

pub const EXPORT_VM: Script = Script {
    name: "export_vm",
    body: r#"
on run argv
	set vm to my findVm(item 1 of argv)
	tell application "UTM" to export vm to POSIX file (item 2 of argv)
	return ""
end run
"#,
};

pub const IMPORT_VM: Script = Script {
    name: "import_vm",
    body: r#"
on run argv
	tell application "UTM"
		set vm to import new virtual machine from POSIX file (item 1 of argv)
		return id of vm
	end tell
end run
"#,
};
